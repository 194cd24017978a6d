//! Wire types shared by the pull server and the client object graph
//!
//! - [`cursor`]: the phased pull cursor and its opaque token encoding
//! - [`protocol`]: change records, pull responses and mutation request bodies
//! - [`validation`]: input checks applied before a mutation is accepted

pub mod cursor;
pub mod protocol;
pub mod validation;

pub use cursor::PullCursor;
pub use protocol::{
    Change, ChangeSet, CreateNewIssueRequest, CreateRequest, CursorMeta, DeleteRequest,
    MutationReceipt, PullResponse, SyncStatus, UpdateRequest,
};
pub use validation::{Validate, ValidationError};
