pub mod entity_resolver;
pub mod mutation_log;
pub mod mutation_service;
pub mod notifier;
pub mod pull_service;

pub use entity_resolver::EntityResolver;
pub use mutation_log::{LogEntry, MutationLog, NewLogEntry};
pub use mutation_service::MutationService;
pub use notifier::{
    notifier_from_config, BroadcastNotifier, ChangeNotifier, LogNotifier, WebhookNotifier,
};
pub use pull_service::PullService;
