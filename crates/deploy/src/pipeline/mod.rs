//! The provisioning pipeline.
//!
//! Steps run strictly one after the other, one transaction at a time:
//! signer check, settings, deployer, contracts in plan order, configuration
//! calls, ownership transfer, cost. Every step persists its facts before the
//! next one starts.

mod context;
mod runner;

use alloy_core::primitives::B256;

pub use context::{DeployedContract, RunContext, RunState};
pub use runner::{Pipeline, RunReport};

/// Failures of the pipeline itself, as opposed to RPC or signer failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("run aborted by the operator")]
    Aborted,
    #[error("illegal pipeline transition from {from} to {to}")]
    IllegalTransition { from: RunState, to: RunState },
    #[error("contract '{0}' is not deployed yet")]
    NotDeployed(String),
    #[error("contract '{0}' is already part of this run")]
    AlreadyDeployed(String),
    #[error("ownership of contract '{0}' was already transferred")]
    OwnershipTransferred(String),
    #[error("transaction {0} reverted")]
    Reverted(B256),
    #[error("creation transaction {0} has no contract address in its receipt")]
    MissingContractAddress(B256),
}
