//! Notification sink that records what a requester would have been told.

use parking_lot::Mutex;
use tokio::sync::watch;
use tradehub::{EntryId, Notice, NotificationSink, Payload, TradeEntry, TradeResult};

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Initialized(EntryId),
    Searching(EntryId, String),
    Canceled(EntryId, TradeResult),
    Finished(EntryId, Payload),
    Notified(EntryId, Notice),
}

/// Records every callback in order.
///
/// `Finished` and `Canceled` are terminal; [`RecordingSink::wait_for_terminal`]
/// lets a test park until a number of trades have ended.
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
    terminal: watch::Sender<usize>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        let (terminal, _) = watch::channel(0);
        Self {
            events: Mutex::new(Vec::new()),
            terminal,
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub fn finished(&self) -> Vec<(EntryId, Payload)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Finished(id, payload) => Some((*id, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn canceled(&self) -> Vec<(EntryId, TradeResult)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Canceled(id, result) => Some((*id, *result)),
                _ => None,
            })
            .collect()
    }

    /// Plain-text notices, in order.
    pub fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Notified(_, Notice::Text(text)) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Item-carrying notices, in order.
    pub fn items(&self) -> Vec<(Payload, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Notified(_, Notice::Item { payload, message }) => {
                    Some((payload.clone(), message.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        *self.terminal.borrow()
    }

    /// Wait until at least `count` trades have finished or been canceled.
    pub async fn wait_for_terminal(&self, count: usize) {
        let mut rx = self.terminal.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    fn push(&self, event: SinkEvent) {
        let terminal = matches!(event, SinkEvent::Finished(..) | SinkEvent::Canceled(..));
        self.events.lock().push(event);
        if terminal {
            self.terminal.send_modify(|seen| *seen += 1);
        }
    }
}

impl NotificationSink for RecordingSink {
    fn on_initialize(&self, entry: &TradeEntry) {
        self.push(SinkEvent::Initialized(entry.id));
    }

    fn on_searching(&self, entry: &TradeEntry, status: &str) {
        self.push(SinkEvent::Searching(entry.id, status.to_string()));
    }

    fn on_canceled(&self, entry: &TradeEntry, reason: TradeResult) {
        self.push(SinkEvent::Canceled(entry.id, reason));
    }

    fn on_finished(&self, entry: &TradeEntry, received: &Payload) {
        self.push(SinkEvent::Finished(entry.id, received.clone()));
    }

    fn on_notify(&self, entry: &TradeEntry, notice: Notice) {
        self.push(SinkEvent::Notified(entry.id, notice));
    }
}
