use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Progress pushed from a running session to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    PlaceholderCreated {
        message_index: usize,
    },
    Progress {
        message_index: usize,
        content: String,
    },
    Final {
        message_index: usize,
        content: String,
    },
}

impl Notification {
    pub fn message_index(&self) -> usize {
        match self {
            Notification::PlaceholderCreated { message_index }
            | Notification::Progress { message_index, .. }
            | Notification::Final { message_index, .. } => *message_index,
        }
    }

    /// Cumulative content carried by the notification; empty for a placeholder.
    pub fn content(&self) -> &str {
        match self {
            Notification::PlaceholderCreated { .. } => "",
            Notification::Progress { content, .. } | Notification::Final { content, .. } => {
                content
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Notification::Final { .. })
    }
}

/// Outbound port for session progress. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Forwards notifications over an unbounded channel, preserving order.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }
}

/// Discards everything. Useful for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, notification: Notification) {
        trace!(index = notification.message_index(), "Dropping notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_notifier_preserves_order() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.notify(Notification::PlaceholderCreated { message_index: 1 });
        notifier.notify(Notification::Progress {
            message_index: 1,
            content: "Hel".to_string(),
        });
        notifier.notify(Notification::Final {
            message_index: 1,
            content: "Hello".to_string(),
        });
        drop(notifier);

        let mut seen = Vec::new();
        while let Some(n) = receiver.recv().await {
            seen.push(n);
        }
        assert_eq!(seen.len(), 3);
        assert!(!seen[1].is_complete());
        assert!(seen[2].is_complete());
        assert_eq!(seen[2].content(), "Hello");
    }

    #[test]
    fn test_notify_after_receiver_dropped() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.notify(Notification::PlaceholderCreated { message_index: 0 });
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(Notification::Progress {
            message_index: 2,
            content: "Hi".to_string(),
        })
        .unwrap();
        assert_eq!(value["event"], "progress");
        assert_eq!(value["message_index"], 2);
        assert_eq!(value["content"], "Hi");

        let value =
            serde_json::to_value(Notification::PlaceholderCreated { message_index: 0 }).unwrap();
        assert_eq!(value["event"], "placeholder-created");
    }
}
