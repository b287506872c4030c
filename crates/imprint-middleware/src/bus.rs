//! Headless publish/subscribe bus for visualization clouds.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! receives every message without any single subscriber blocking the
//! others, or the publisher.
//!
//! # Labels
//!
//! Every [`CloudMessage`] carries a label.  The reconstructor publishes:
//!
//! | Label | Traffic |
//! |---|---|
//! | `imprint` | The combined imprint handed to the pose estimator |
//! | `imprint/right` | Right-sensor imprint (view mode) |
//! | `imprint/left` | Left-sensor imprint (view mode) |
//!
//! [`LabelSubscriber`] filters the stream by label prefix, so subscribing to
//! `"imprint/"` yields both per-side clouds and nothing else.

use imprint_types::{ImprintError, PointCloud};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::broadcast::{Broadcaster, CloudMessage};

/// Default channel capacity (messages buffered before slow subscribers
/// start losing the oldest ones).
const DEFAULT_CAPACITY: usize = 64;

/// Shared cloud bus.  Clone it cheaply; all clones share one channel.
#[derive(Clone, Debug)]
pub struct ImprintBus {
    sender: broadcast::Sender<CloudMessage>,
}

impl ImprintBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish `message` to every current subscriber.
    ///
    /// Returns the number of receivers handed the message.  Having nobody
    /// listening is normal for a visualization feed and yields `Ok(0)`.
    pub fn publish(&self, message: CloudMessage) -> usize {
        let label = message.label.clone();
        match self.sender.send(message) {
            Ok(n) => n,
            Err(broadcast::error::SendError(_)) => {
                debug!(%label, "no subscribers for cloud message");
                0
            }
        }
    }

    /// Subscribe to every message on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<CloudMessage> {
        self.sender.subscribe()
    }

    /// Subscribe to messages whose label starts with `prefix`.
    pub fn subscribe_label(&self, prefix: impl Into<String>) -> LabelSubscriber {
        LabelSubscriber {
            prefix: prefix.into(),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ImprintBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for ImprintBus {
    fn broadcast(
        &self,
        cloud: &PointCloud,
        frame: &str,
        label: &str,
    ) -> Result<usize, ImprintError> {
        Ok(self.publish(CloudMessage::new(cloud, frame, label)))
    }
}

// ---------------------------------------------------------------------------
// Label-prefix subscriber
// ---------------------------------------------------------------------------

/// A subscriber that only delivers messages whose label starts with the
/// given prefix.
pub struct LabelSubscriber {
    prefix: String,
    receiver: broadcast::Receiver<CloudMessage>,
}

impl LabelSubscriber {
    /// Wait for the next matching message.
    ///
    /// Returns `None` once the bus is closed.  Lagging skips the lost
    /// messages with a warning and keeps going.
    pub async fn recv(&mut self) -> Option<CloudMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if msg.label.starts_with(&self.prefix) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(prefix = %self.prefix, lagged_by = n, "LabelSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
