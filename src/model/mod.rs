//! Domain records shared by the server log, the pull protocol and the client pool.
//!
//! Every record serializes with camelCase field names and RFC 3339 timestamps, which is
//! the shape stored in log payloads and sent over the wire.

pub mod ids;
pub mod kinds;
pub mod records;

pub use ids::generate_id;
pub use kinds::{EntityType, Method};
pub use records::{Comment, Description, Issue, IssuePriority, IssueStatus};
