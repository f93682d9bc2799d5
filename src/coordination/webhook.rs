//! # Webhook Gate
//!
//! Rendezvous between branches suspended on an external callback and the callers that deliver
//! those callbacks. Each webhook key owns a mailbox: signals that arrive before anyone waits
//! are buffered in order, waiters that arrive before any signal park on a oneshot channel.
//!
//! Buffered signals expire after a configured time to live and each key keeps at most a
//! configured number of them, dropping the oldest first. Expired signals are purged whenever a
//! new signal is buffered.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// External callback delivered for a webhook key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSignal {
    pub action: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WebhookSignal {
    pub fn new(action: Option<impl Into<String>>) -> Self {
        Self {
            action: action.map(Into::into),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// Handed to a suspended branch
    Delivered,
    /// Nobody was waiting; kept for the next waiter on this key
    Buffered,
}

/// A wait on a webhook key ran out of time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no webhook signal for '{webhook_key}' within {timeout_seconds}s")]
pub struct WebhookWaitTimeout {
    pub webhook_key: String,
    pub timeout_seconds: u64,
}

const DEFAULT_SIGNAL_TTL: Duration = Duration::from_secs(86_400);
const DEFAULT_MAX_BUFFERED: usize = 64;

#[derive(Debug)]
struct BufferedSignal {
    signal: WebhookSignal,
    buffered_at: Instant,
}

#[derive(Debug, Default)]
struct Mailbox {
    pending: VecDeque<BufferedSignal>,
    waiters: VecDeque<oneshot::Sender<WebhookSignal>>,
}

impl Mailbox {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.waiters.is_empty()
    }

    fn drop_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|buffered| now.saturating_duration_since(buffered.buffered_at) < ttl);
        before - self.pending.len()
    }
}

#[derive(Debug)]
pub struct WebhookGate {
    mailboxes: DashMap<String, Mailbox>,
    signal_ttl: Duration,
    max_buffered: usize,
}

impl Default for WebhookGate {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SIGNAL_TTL, DEFAULT_MAX_BUFFERED)
    }
}

impl WebhookGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate whose buffered signals live for `signal_ttl`, at most `max_buffered` per key
    pub fn with_limits(signal_ttl: Duration, max_buffered: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            signal_ttl,
            max_buffered: max_buffered.max(1),
        }
    }

    /// Deliver a signal to the oldest live waiter of `webhook_key`, or buffer it
    pub fn signal(&self, webhook_key: &str, signal: WebhookSignal) -> SignalDelivery {
        self.purge_expired();
        let mut mailbox = self.mailboxes.entry(webhook_key.to_string()).or_default();

        let mut signal = signal;
        while let Some(waiter) = mailbox.waiters.pop_front() {
            match waiter.send(signal) {
                Ok(()) => {
                    info!(webhook_key = %webhook_key, "🔔 Webhook signal delivered");
                    return SignalDelivery::Delivered;
                }
                // waiter timed out or was cancelled; try the next one
                Err(returned) => signal = returned,
            }
        }

        while mailbox.pending.len() >= self.max_buffered {
            mailbox.pending.pop_front();
            warn!(
                webhook_key = %webhook_key,
                max_buffered = self.max_buffered,
                "Webhook buffer full, dropped oldest signal"
            );
        }

        debug!(webhook_key = %webhook_key, "Webhook signal buffered");
        mailbox.pending.push_back(BufferedSignal {
            signal,
            buffered_at: Instant::now(),
        });
        SignalDelivery::Buffered
    }

    /// Suspend until a signal for `webhook_key` arrives or `timeout` elapses
    pub async fn await_signal(
        &self,
        webhook_key: &str,
        timeout: Duration,
    ) -> Result<WebhookSignal, WebhookWaitTimeout> {
        let mut rx = {
            let mut mailbox = self.mailboxes.entry(webhook_key.to_string()).or_default();
            mailbox.drop_expired(Instant::now(), self.signal_ttl);
            if let Some(buffered) = mailbox.pending.pop_front() {
                debug!(webhook_key = %webhook_key, "Consumed buffered webhook signal");
                return Ok(buffered.signal);
            }
            let (tx, rx) = oneshot::channel();
            mailbox.waiters.push_back(tx);
            rx
        };

        debug!(webhook_key = %webhook_key, timeout_seconds = timeout.as_secs(), "🪝 Waiting for webhook");

        let received = tokio::select! {
            received = &mut rx => received.ok(),
            _ = tokio::time::sleep(timeout) => {
                // a signal may have landed between the deadline and closing the channel
                rx.close();
                rx.try_recv().ok()
            }
        };

        self.prune(webhook_key);

        received.ok_or_else(|| {
            warn!(webhook_key = %webhook_key, timeout_seconds = timeout.as_secs(), "⏰ Webhook wait timed out");
            WebhookWaitTimeout {
                webhook_key: webhook_key.to_string(),
                timeout_seconds: timeout.as_secs(),
            }
        })
    }

    /// Number of signals buffered for a key
    pub fn pending_count(&self, webhook_key: &str) -> usize {
        self.mailboxes
            .get(webhook_key)
            .map_or(0, |mailbox| mailbox.pending.len())
    }

    pub fn waiter_count(&self, webhook_key: &str) -> usize {
        self.mailboxes.get(webhook_key).map_or(0, |mailbox| {
            mailbox
                .waiters
                .iter()
                .filter(|waiter| !waiter.is_closed())
                .count()
        })
    }

    /// Drop expired buffered signals of every key and forget idle mailboxes
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut dropped = 0;
        self.mailboxes.retain(|_, mailbox| {
            dropped += mailbox.drop_expired(now, self.signal_ttl);
            mailbox.waiters.retain(|waiter| !waiter.is_closed());
            !mailbox.is_idle()
        });
        if dropped > 0 {
            debug!(dropped = dropped, "Expired webhook signals purged");
        }
        dropped
    }

    fn prune(&self, webhook_key: &str) {
        if let Some(mut mailbox) = self.mailboxes.get_mut(webhook_key) {
            mailbox.waiters.retain(|waiter| !waiter.is_closed());
        }
        self.mailboxes
            .remove_if(webhook_key, |_, mailbox| mailbox.is_idle());
    }
}
