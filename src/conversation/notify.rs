//! Outward notifications: status strings and transcript entries.
//!
//! The controller publishes through a [`NotificationSink`]; sinks must never
//! block.  [`ChannelSink`] forwards everything to the display as [`UiEvent`]s
//! over an unbounded tokio channel.

use tokio::sync::mpsc;

use crate::conversation::state::ConversationTurn;

// ---------------------------------------------------------------------------
// NotificationSink
// ---------------------------------------------------------------------------

/// Fire-and-forget receiver of controller notifications.
pub trait NotificationSink: Send + Sync {
    fn publish_status(&self, status: &str);
    fn publish_turn(&self, turn: &ConversationTurn);
}

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Status(String),
    Turn(ConversationTurn),
}

/// Sends notifications to the display task.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelSink {
    /// Returns the sink and the receiving end for the display.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UiEvent) {
        // The window may already be closed during shutdown.
        if self.tx.send(event).is_err() {
            log::debug!("notify: display has gone away");
        }
    }
}

impl NotificationSink for ChannelSink {
    fn publish_status(&self, status: &str) {
        self.send(UiEvent::Status(status.to_string()));
    }

    fn publish_turn(&self, turn: &ConversationTurn) {
        self.send(UiEvent::Turn(turn.clone()));
    }
}

// ---------------------------------------------------------------------------
// RecordingSink  (test-only)
// ---------------------------------------------------------------------------

/// Keeps every notification for inspection.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<UiEvent>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Status(s) => Some(s),
                UiEvent::Turn(_) => None,
            })
            .collect()
    }

    pub fn turns(&self) -> Vec<ConversationTurn> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Turn(t) => Some(t),
                UiEvent::Status(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl NotificationSink for RecordingSink {
    fn publish_status(&self, status: &str) {
        self.events
            .lock()
            .unwrap()
            .push(UiEvent::Status(status.to_string()));
    }

    fn publish_turn(&self, turn: &ConversationTurn) {
        self.events.lock().unwrap().push(UiEvent::Turn(turn.clone()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::state::Role;

    #[test]
    fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let turn = ConversationTurn::new(Role::User, "hello");

        sink.publish_status("Processing");
        sink.publish_turn(&turn);

        assert_eq!(rx.try_recv().unwrap(), UiEvent::Status("Processing".into()));
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Turn(turn));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn publishing_after_display_closed_does_not_panic() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.publish_status("Listening");
    }

    #[test]
    fn recording_sink_splits_statuses_and_turns() {
        let sink = RecordingSink::new();
        sink.publish_status("Listening");
        sink.publish_turn(&ConversationTurn::new(Role::Assistant, "hi"));

        assert_eq!(sink.statuses(), vec!["Listening"]);
        assert_eq!(sink.turns()[0].content, "hi");
    }
}
