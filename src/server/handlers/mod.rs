pub mod health;
pub mod mutate;
pub mod pull;
