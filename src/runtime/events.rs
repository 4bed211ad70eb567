//! Notifications from the owner thread to the host.

use crate::error::ScriptFailure;
use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

/// Something the host should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Script called `sendToHost(text)`.
    MessageReady(String),
    /// A script-domain failure was caught and the loop kept running.
    ScriptFailed(ScriptFailure),
}

/// Callback registered at construction; invoked on the owner thread.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(HostEvent) + Send + Sync>);

impl EventSink {
    pub fn new(callback: impl Fn(HostEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    /// Forward events into a channel. Events are dropped once the receiver is gone.
    pub fn channel() -> (Self, mpsc::Receiver<HostEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        let sink = Self::new(move |event| {
            let _ = tx.lock().send(event);
        });
        (sink, rx)
    }

    /// Discards every event.
    pub fn ignore() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: HostEvent) {
        (self.0)(event);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_delivers_in_order() {
        let (sink, rx) = EventSink::channel();
        sink.emit(HostEvent::MessageReady("a".into()));
        sink.clone().emit(HostEvent::ScriptFailed(ScriptFailure::new("boom")));

        assert_eq!(rx.recv().unwrap(), HostEvent::MessageReady("a".into()));
        assert_eq!(
            rx.recv().unwrap(),
            HostEvent::ScriptFailed(ScriptFailure::new("boom"))
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(HostEvent::MessageReady("lost".into()));
    }
}
