//! fallout-deploy - Provisioning library for the Fallout contracts.
//!
//! This crate deploys the Fallout contracts in dependency order, configures
//! them, hands their ownership to the long-term owner and keeps an
//! append-only record of every run.

pub mod abi;
pub mod artifact;
pub mod gate;
pub mod pipeline;
pub mod plan;
pub mod record;
pub mod rpc;
pub mod signer;
pub mod tx;

mod deployer;
pub use deployer::{CONFIG_FILENAME, DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_RPC_URL, Deployment};

pub use abi::{Arg, ArgSpec};
pub use artifact::{Artifact, ArtifactStore};
pub use gate::{AutoConfirm, ConfirmationPort, GatePoint, GatePolicy, Interrupt, TerminalGate};
pub use pipeline::{DeployedContract, Pipeline, PipelineError, RunContext, RunReport, RunState};
pub use plan::{CallSpec, ContractSpec, ProvisionPlan};
pub use record::{DeploymentRecord, RecordError};
pub use signer::{
    AnySigner, Signer, SignerConfig, SignerError, SignerIdentity, SignerKind, resolve_identity,
};
pub use tx::{TxReceipt, TxRequest};
