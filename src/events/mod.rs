//! Execution-completion notifications.
//!
//! A bounded, drop-on-full channel carrying one [`JobLogEntry`] per finished
//! execution. This is a best-effort UI signal, never a guaranteed delivery
//! channel: the engine must not block on a slow or absent subscriber.

use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::core::JobLogEntry;

/// Default buffer size for the executed-notification channel.
pub const DEFAULT_NOTIFY_BUFFER: usize = 16;

/// Publisher side of the executed-notification channel.
#[derive(Debug, Default)]
pub struct ExecutedNotifier {
    sender: Mutex<Option<mpsc::Sender<JobLogEntry>>>,
}

impl ExecutedNotifier {
    /// Create a notifier with no subscriber attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subscriber, replacing any previous one.
    ///
    /// Returns the receiving end; entries published while the buffer is full
    /// are dropped.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<JobLogEntry> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        if let Ok(mut guard) = self.sender.lock() {
            *guard = Some(tx);
        }
        rx
    }

    /// Publish an entry without blocking.
    pub fn publish(&self, entry: JobLogEntry) {
        let Ok(mut guard) = self.sender.lock() else {
            return;
        };
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                tracing::debug!(job = %entry.job_name, "subscriber buffer full, dropping executed notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *guard = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobId;

    fn entry(name: &str) -> JobLogEntry {
        JobLogEntry::new(JobId::new("j"), name)
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_a_noop() {
        let notifier = ExecutedNotifier::new();
        notifier.publish(entry("orphan"));
    }

    #[tokio::test]
    async fn test_subscriber_receives_entries() {
        let notifier = ExecutedNotifier::new();
        let mut rx = notifier.subscribe(4);

        notifier.publish(entry("first"));
        notifier.publish(entry("second"));

        assert_eq!(rx.recv().await.unwrap().job_name, "first");
        assert_eq!(rx.recv().await.unwrap().job_name, "second");
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let notifier = ExecutedNotifier::new();
        let mut rx = notifier.subscribe(2);

        notifier.publish(entry("a"));
        notifier.publish(entry("b"));
        notifier.publish(entry("dropped"));

        assert_eq!(rx.recv().await.unwrap().job_name, "a");
        assert_eq!(rx.recv().await.unwrap().job_name, "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_after_subscriber_dropped() {
        let notifier = ExecutedNotifier::new();
        let rx = notifier.subscribe(2);
        drop(rx);

        notifier.publish(entry("nobody home"));
        notifier.publish(entry("still fine"));
    }
}
