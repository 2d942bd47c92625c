//! User-facing notifications
//!
//! Long-running or user-visible operations publish a `DataEvent` on the
//! `EventBus`. Nothing in the file manager depends on anyone listening:
//! publishing with no subscribers is not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::providers::PermissionLevel;
use crate::reindex::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DataEvent {
    /// A share request was accepted by the remote system
    ShareStarted {
        recipient: String,
        grantor: String,
        grantee: String,
        permission: PermissionLevel,
        file_id: String,
    },
    /// Outputs of a finished job are now searchable
    JobIndexed {
        recipient: String,
        job_id: String,
        status: JobStatus,
        archive_path: String,
    },
}

impl DataEvent {
    /// User the notification is addressed to
    pub fn recipient(&self) -> &str {
        match self {
            DataEvent::ShareStarted { recipient, .. } | DataEvent::JobIndexed { recipient, .. } => recipient,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DataEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DataEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it
    pub fn publish(&self, event: DataEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::debug!("No subscribers for {:?} event to {}", event, event.recipient());
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn share_event() -> DataEvent {
        DataEvent::ShareStarted {
            recipient: "alice".to_string(),
            grantor: "alice".to_string(),
            grantee: "bob".to_string(),
            permission: PermissionLevel::Read,
            file_id: "data.storage/alice/report.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(share_event()), 1);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert_eq!(received, share_event());
        assert_eq!(received.recipient(), "alice");
    }

    #[test]
    fn test_publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::new(1);
        assert_eq!(bus.publish(share_event()), 0);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(share_event()).unwrap();
        assert_eq!(json["event"], "share_started");
        assert_eq!(json["permission"], "READ");
    }
}
