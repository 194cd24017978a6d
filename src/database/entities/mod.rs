pub mod comments;
pub mod descriptions;
pub mod issues;
pub mod workspace_changes;
