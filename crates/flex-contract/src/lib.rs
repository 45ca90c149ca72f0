// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-contract
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The contract compiler.
pub mod compiler;
/// Facet definitions and the catalog.
pub mod facet;
/// The structural schema-subset rule.
pub mod subset;
/// Payload validation and contract summaries.
pub mod validate;

pub use compiler::{CompiledContract, compile_contract};
pub use facet::{FacetCatalog, FacetDefinition};
pub use subset::is_schema_subset;
pub use validate::{ContractViolation, contract_summary, validate_payload};

/// Errors raised by contract operations.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// A `json_schema` contract could not be compiled by the validator.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}
