// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-engine
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Cancellation primitives.
pub mod cancel;
/// The execution engine itself.
pub mod engine;
/// The HITL service boundary and an in-memory implementation.
pub mod hitl;
/// The capability runtime boundary.
pub mod runtime;
/// The event sink the engine and coordinator emit through.
pub mod sink;

pub use cancel::{CancellationReason, CancellationToken};
pub use engine::{EngineOutcome, ExecuteArgs, ExecutionEngine};
pub use hitl::{HitlError, HitlService, InMemoryHitlService};
pub use runtime::{CapabilityError, CapabilityRequest, CapabilityResponse, CapabilityRuntime};
pub use sink::{EventSink, SinkStats};

use flex_core::EngineSignal;
use flex_policy::PolicyError;
use flex_store::StoreError;

/// Errors (and signals) surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A control-flow signal for the coordinator to interpret.
    #[error(transparent)]
    Signal(#[from] EngineSignal),

    /// The run was cancelled cooperatively.
    #[error("run cancelled")]
    Cancelled,

    /// A capability invocation failed.
    #[error("capability invocation failed on node '{node_id}': {message}")]
    Capability {
        /// The node whose invocation failed.
        node_id: String,
        /// Runtime-reported message.
        message: String,
    },

    /// A persistence write failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Policy evaluation failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// A contract schema failed to compile.
    #[error(transparent)]
    Contract(#[from] flex_contract::ContractError),
}
