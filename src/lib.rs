pub mod config;
pub mod errors;
pub mod model;
pub mod sync;

pub mod client;
pub mod database;
pub mod services;

#[cfg(feature = "server")]
pub mod server;
