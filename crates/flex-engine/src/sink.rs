// SPDX-License-Identifier: MIT OR Apache-2.0
//! The event sink the engine and coordinator emit through.
//!
//! A bounded mpsc channel wrapper: the coordinator owns the producer
//! end, the transport owns the consumer end. Emission applies the
//! per-run enrichment (run id, active plan version) and tracks
//! emitted/dropped counters.

use crate::cancel::{CancellationReason, CancellationToken};
use flex_core::{EventFrame, EventKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of sink statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Frames successfully handed to the channel.
    pub emitted: u64,
    /// Frames lost because the consumer went away.
    pub dropped: u64,
}

/// Producer half of a run's event channel.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<EventFrame>,
    run_id: String,
    // 0 means "no plan yet"; enrichment skips it.
    plan_version: Arc<AtomicU32>,
    counters: Arc<Counters>,
    cancel_on_close: Option<CancellationToken>,
}

impl EventSink {
    /// Create a sink/stream pair for one run.
    #[must_use]
    pub fn channel(run_id: impl Into<String>, capacity: usize) -> (Self, ReceiverStream<EventFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                run_id: run_id.into(),
                plan_version: Arc::new(AtomicU32::new(0)),
                counters: Arc::new(Counters::default()),
                cancel_on_close: None,
            },
            ReceiverStream::new(rx),
        )
    }

    /// Cancel `token` (reason: caller disconnected) when the consumer end
    /// of the channel goes away.
    #[must_use]
    pub fn cancel_on_close(mut self, token: CancellationToken) -> Self {
        self.cancel_on_close = Some(token);
        self
    }

    /// Record the active plan version; subsequent frames carry it.
    pub fn set_plan_version(&self, version: u32) {
        self.plan_version.store(version, Ordering::SeqCst);
    }

    /// Emit an event, enriched with the run id and active plan version.
    ///
    /// A closed channel (caller went away) is not an error here — the
    /// frame is counted as dropped and the run keeps executing; the
    /// coordinator observes disconnection through its cancellation token.
    pub async fn emit(&self, kind: EventKind, node_id: Option<&str>) {
        let mut frame = EventFrame::new(kind).with_run(self.run_id.clone());
        if let Some(node_id) = node_id {
            frame = frame.with_node(node_id);
        }
        let version = self.plan_version.load(Ordering::SeqCst);
        if version > 0 {
            frame = frame.with_plan_version(version);
        }
        if self.tx.send(frame).await.is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(target: "flex.sink", run = %self.run_id, "event dropped; consumer gone");
            if let Some(token) = &self.cancel_on_close {
                token.cancel(CancellationReason::CallerDisconnected);
            }
        } else {
            self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// The run this sink belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}
