// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-policy
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Runtime policy evaluation.
pub mod evaluate;
/// The canonical policy model.
pub mod model;
/// The policy normalizer.
pub mod normalize;

pub use evaluate::{
    RuntimeEffect, evaluate_run_start_effect, evaluate_runtime_effect,
    find_post_condition_policy,
};
pub use model::{
    PlannerPolicy, PolicyAction, PolicySelector, PolicyTrigger, RuntimePolicy, TopologyPolicy,
    TriggerKind,
};
pub use normalize::{NormalizedPolicies, normalize_policies};

use flex_condition::ConditionError;

/// Errors raised while normalizing or evaluating policies.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy payload did not match any accepted shape.
    #[error("invalid policy shape: {0}")]
    InvalidShape(String),

    /// An authored DSL condition failed to parse or validate.
    #[error("policy '{policy_id}' has an invalid condition: {source}")]
    Condition {
        /// The offending policy.
        policy_id: String,
        /// The underlying condition error.
        source: ConditionError,
    },

    /// A condition failed during evaluation.
    #[error("policy '{policy_id}' condition evaluation failed: {source}")]
    Evaluation {
        /// The offending policy.
        policy_id: String,
        /// The underlying condition error.
        source: ConditionError,
    },
}
