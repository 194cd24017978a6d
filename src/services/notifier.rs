//! Change notifiers
//!
//! A notifier tells other clients of a workspace to pull again. Delivery is fire-and-forget:
//! the mutation service spawns the call and only logs failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{NotifierConfig, NotifierKind};
use crate::errors::NotifyError;

#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, workspace_id: &str) -> Result<(), NotifyError>;
}

/// Records pokes in the log and nothing else.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl ChangeNotifier for LogNotifier {
    async fn notify(&self, workspace_id: &str) -> Result<(), NotifyError> {
        info!("Poke for workspace {}", workspace_id);
        Ok(())
    }
}

/// In-process fan-out of workspace ids.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<String>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeNotifier for BroadcastNotifier {
    async fn notify(&self, workspace_id: &str) -> Result<(), NotifyError> {
        // No subscribers is not a failure
        match self.sender.send(workspace_id.to_string()) {
            Ok(receivers) => debug!("Poked {} subscribers of {}", receivers, workspace_id),
            Err(_) => debug!("No subscribers for workspace {}", workspace_id),
        }
        Ok(())
    }
}

/// Posts `{channel, event: "poke"}` to an external push service.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ChangeNotifier for WebhookNotifier {
    async fn notify(&self, workspace_id: &str) -> Result<(), NotifyError> {
        self.client
            .post(&self.url)
            .json(&json!({
                "channel": workspace_id,
                "event": "poke",
                "data": {},
            }))
            .send()
            .await?
            .error_for_status()?;
        debug!("Webhook poke delivered for {}", workspace_id);
        Ok(())
    }
}

pub fn notifier_from_config(config: &NotifierConfig) -> Result<Arc<dyn ChangeNotifier>, NotifyError> {
    let notifier: Arc<dyn ChangeNotifier> = match config.kind {
        NotifierKind::Log => Arc::new(LogNotifier),
        NotifierKind::Broadcast => Arc::new(BroadcastNotifier::default()),
        NotifierKind::Webhook => {
            let url = config.webhook_url.clone().ok_or_else(|| {
                NotifyError::Unavailable("webhook notifier has no url".to_string())
            })?;
            Arc::new(WebhookNotifier::new(url)?)
        }
    };
    Ok(notifier)
}
