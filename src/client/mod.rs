//! Client side of the sync engine
//!
//! The [`ObjectPool`] is an identity map of [`Entity`] values addressed by `(ModelKind, id)`.
//! Relations are declared statically in [`schema`] and resolved through the pool, so cyclic
//! references are plain ids. An [`ObjectGraph`] feeds one pool from pull responses and owns the
//! [`OptimisticMutationCoordinator`] that mutates it.

pub mod coordinator;
pub mod entity;
pub mod graph;
pub mod pool;
pub mod relations;
pub mod schema;
pub mod transport;

pub use coordinator::{MutationTransport, OptimisticMutationCoordinator, RetryPolicy};
pub use entity::{Entity, PendingChange};
pub use graph::{ObjectGraph, ObjectGraphFactory, Puller, SyncState};
pub use pool::{ObjectPool, PoolEvent, SharedPool};
pub use relations::{EntityKey, OrphanIndex};
pub use schema::{ModelKind, ModelSchema};
pub use transport::HttpTransport;
