use crate::domain::notification::Notification;
use crate::domain::ports::{NotificationSink, NotificationSinkRef};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Writes every notification to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn publish(&self, notification: Notification) {
        info!(
            event = notification.event_name(),
            user_id = notification.user_id(),
            message = notification.message(),
            "Notification published"
        );
    }
}

/// Forwards notifications to an async consumer, e.g. a websocket broadcaster.
///
/// Sending never blocks; if the receiver is gone the notification is dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelNotifier {
    fn publish(&self, notification: Notification) {
        if let Err(error) = self.sender.send(notification) {
            debug!(event = error.0.event_name(), "Notification receiver closed, dropping");
        }
    }
}

/// Publishes to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<NotificationSinkRef>,
}

impl FanoutNotifier {
    pub fn new(sinks: Vec<NotificationSinkRef>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutNotifier {
    fn publish(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.publish(notification.clone());
        }
    }
}
