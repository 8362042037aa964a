//! In-memory task publisher for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::TaskPublisher;

/// A publisher that records message bodies instead of contacting a
/// broker. Can be configured to fail or delay publishes to exercise
/// error paths and the stop barrier.
#[derive(Debug)]
pub struct MemoryPublisher {
    topic: String,
    messages: Mutex<Vec<String>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl MemoryPublisher {
    /// Creates a publisher for the given topic label.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            messages: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    /// Makes subsequent publishes fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent publishes sleep before completing.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn delay_publishes(&self, delay: Duration) {
        *self.delay.lock().expect("memory publisher lock poisoned") = Some(delay);
    }

    /// Returns the bodies published so far, in completion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn published(&self) -> Vec<String> {
        self.messages
            .lock()
            .expect("memory publisher lock poisoned")
            .clone()
    }
}

#[async_trait]
impl TaskPublisher for MemoryPublisher {
    async fn publish(&self, body: String) -> Result<()> {
        let delay = *self
            .delay
            .lock()
            .map_err(|_| Error::dispatch("memory publisher lock poisoned"))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::dispatch("synthetic publish failure"));
        }

        self.messages
            .lock()
            .map_err(|_| Error::dispatch("memory publisher lock poisoned"))?
            .push(body);
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
