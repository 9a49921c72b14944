// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cascade trigger: the best-effort "process next" nudge fired after every
//! terminal step transition.
//!
//! The trigger replaces any polling loop. Losing a nudge only degrades
//! throughput: the next inbound request runs the sweeper and selection
//! anyway, so no progress is lost permanently.

use std::time::Duration;

use tracing::debug;

/// Fire-and-forget "process next" signal to a worker (any worker).
pub trait Trigger: Send + Sync {
    /// Nudge some worker to process the next ready step. Must not block and
    /// must not fail the caller.
    fn fire(&self);
}

/// HTTP trigger: POSTs to a worker's internal process-next route.
pub struct HttpTrigger {
    client: reqwest::Client,
    url: String,
    secret: String,
}

/// Header carrying the shared trigger secret.
pub const TRIGGER_SECRET_HEADER: &str = "x-filament-trigger-secret";

impl HttpTrigger {
    /// Create a trigger aimed at `base_url`'s process-next route.
    pub fn new(base_url: &str, secret: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/internal/process-next", base_url.trim_end_matches('/')),
            secret: secret.into(),
        }
    }
}

impl Trigger for HttpTrigger {
    fn fire(&self) {
        let request = self
            .client
            .post(&self.url)
            .header(TRIGGER_SECRET_HEADER, &self.secret);
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = request.send().await {
                debug!(url = %url, error = %e, "cascade trigger failed (best-effort)");
            }
        });
    }
}

/// In-process trigger for embedded single-process deployments: nudges a
/// drain loop through an unbounded channel.
pub struct ChannelTrigger {
    tx: tokio::sync::mpsc::UnboundedSender<()>,
}

impl ChannelTrigger {
    /// Create the trigger and the receiving end for the drain loop.
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Trigger for ChannelTrigger {
    fn fire(&self) {
        // Receiver gone means the drain loop is shutting down; nothing to do.
        let _ = self.tx.send(());
    }
}

/// No-op trigger for tests that drive the processor by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrigger;

impl Trigger for NullTrigger {
    fn fire(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_trigger_delivers_nudges() {
        let (trigger, mut rx) = ChannelTrigger::new();
        trigger.fire();
        trigger.fire();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_trigger_survives_closed_receiver() {
        let (trigger, rx) = ChannelTrigger::new();
        drop(rx);
        trigger.fire();
    }

    #[test]
    fn test_null_trigger_is_inert() {
        NullTrigger.fire();
    }
}
