use thiserror::Error;

/// Failure delivering a change notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notifier request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notifier unavailable: {0}")]
    Unavailable(String),
}
