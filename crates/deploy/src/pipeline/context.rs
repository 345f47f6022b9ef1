//! Run context threaded through the pipeline steps.
//!
//! Each step consumes the context and returns the next one; nothing about a
//! run lives in shared mutable state.

use alloy_core::primitives::{Address, B256};

use super::PipelineError;
use crate::{abi::Arg, signer::SignerIdentity};

/// Where the run stands.
///
/// `Idle → SignerReady → ContractsDeployed(n) → Configured → OwnershipTransferred → Done`,
/// with any state able to move to `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RunState {
    Idle,
    SignerReady,
    #[strum(to_string = "ContractsDeployed({0})")]
    ContractsDeployed(usize),
    Configured,
    OwnershipTransferred,
    Done,
    Aborted,
}

impl RunState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Done | Aborted, _) => false,
            (_, Aborted) => true,
            (Idle, SignerReady) => true,
            (SignerReady, ContractsDeployed(1)) => true,
            (ContractsDeployed(n), ContractsDeployed(m)) => m == n + 1,
            (SignerReady | ContractsDeployed(_), Configured) => true,
            (Configured | OwnershipTransferred, OwnershipTransferred) => true,
            (Configured | OwnershipTransferred, Done) => true,
            _ => false,
        }
    }

    fn advance(self, next: RunState) -> Result<RunState, PipelineError> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::IllegalTransition { from: self, to: next })
        }
    }
}

/// A contract known to the run, deployed by it or attached from elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub id: String,
    pub label: String,
    pub address: Address,
    pub args: Vec<Arg>,
    /// Creation transaction, `None` when attached.
    pub tx_hash: Option<B256>,
    pub attached: bool,
}

/// Immutable snapshot of a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    network: String,
    run_id: String,
    state: RunState,
    signer: Option<SignerIdentity>,
    contracts: Vec<DeployedContract>,
    transferred: Vec<String>,
}

impl RunContext {
    pub fn new(network: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            run_id: run_id.into(),
            state: RunState::Idle,
            signer: None,
            contracts: Vec::new(),
            transferred: Vec::new(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn signer(&self) -> Option<&SignerIdentity> {
        self.signer.as_ref()
    }

    /// Contracts in the order they became available.
    pub fn contracts(&self) -> &[DeployedContract] {
        &self.contracts
    }

    pub fn contract(&self, id: &str) -> Option<&DeployedContract> {
        self.contracts.iter().find(|c| c.id == id)
    }

    pub fn address_of(&self, id: &str) -> Option<Address> {
        self.contract(id).map(|c| c.address)
    }

    pub fn is_transferred(&self, id: &str) -> bool {
        self.transferred.iter().any(|t| t == id)
    }

    /// Address of `id`, provided the deployer may still administer it.
    pub fn callable_address(&self, id: &str) -> Result<Address, PipelineError> {
        let address = self
            .address_of(id)
            .ok_or_else(|| PipelineError::NotDeployed(id.to_string()))?;
        if self.is_transferred(id) {
            return Err(PipelineError::OwnershipTransferred(id.to_string()));
        }
        Ok(address)
    }

    pub fn with_signer(self, identity: SignerIdentity) -> Result<Self, PipelineError> {
        let state = self.state.advance(RunState::SignerReady)?;
        Ok(Self {
            state,
            signer: Some(identity),
            ..self
        })
    }

    pub fn with_contract(self, contract: DeployedContract) -> Result<Self, PipelineError> {
        if self.contract(&contract.id).is_some() {
            return Err(PipelineError::AlreadyDeployed(contract.id));
        }
        let next = RunState::ContractsDeployed(self.contracts.len() + 1);
        let state = self.state.advance(next)?;

        let mut contracts = self.contracts;
        contracts.push(contract);
        Ok(Self {
            state,
            contracts,
            ..self
        })
    }

    pub fn configured(self) -> Result<Self, PipelineError> {
        let state = self.state.advance(RunState::Configured)?;
        Ok(Self { state, ..self })
    }

    pub fn with_ownership_transferred(self, id: &str) -> Result<Self, PipelineError> {
        self.callable_address(id)?;
        let state = self.state.advance(RunState::OwnershipTransferred)?;

        let mut transferred = self.transferred;
        transferred.push(id.to_string());
        Ok(Self {
            state,
            transferred,
            ..self
        })
    }

    pub fn done(self) -> Result<Self, PipelineError> {
        let state = self.state.advance(RunState::Done)?;
        Ok(Self { state, ..self })
    }

    pub fn aborted(self) -> Self {
        Self {
            state: RunState::Aborted,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::U256;

    fn identity() -> SignerIdentity {
        SignerIdentity {
            address: Address::repeat_byte(0x11),
            chain_id: 31337,
            balance: U256::from(1u64),
        }
    }

    fn contract(id: &str, byte: u8) -> DeployedContract {
        DeployedContract {
            id: id.to_string(),
            label: id.to_string(),
            address: Address::repeat_byte(byte),
            args: vec![],
            tx_hash: None,
            attached: false,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let ctx = RunContext::new("localhost", "1")
            .with_signer(identity())
            .unwrap()
            .with_contract(contract("rr", 1))
            .unwrap()
            .with_contract(contract("crystal", 2))
            .unwrap();
        assert_eq!(ctx.state(), RunState::ContractsDeployed(2));

        let ctx = ctx
            .configured()
            .unwrap()
            .with_ownership_transferred("rr")
            .unwrap()
            .with_ownership_transferred("crystal")
            .unwrap()
            .done()
            .unwrap();
        assert_eq!(ctx.state(), RunState::Done);
        assert!(ctx.is_transferred("rr"));
    }

    #[test]
    fn test_contracts_require_a_signer() {
        let err = RunContext::new("localhost", "1")
            .with_contract(contract("rr", 1))
            .unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));
    }

    #[test]
    fn test_no_calls_after_ownership_transfer() {
        let ctx = RunContext::new("localhost", "1")
            .with_signer(identity())
            .unwrap()
            .with_contract(contract("rr", 1))
            .unwrap()
            .configured()
            .unwrap()
            .with_ownership_transferred("rr")
            .unwrap();

        assert!(matches!(
            ctx.callable_address("rr"),
            Err(PipelineError::OwnershipTransferred(_))
        ));
        assert!(matches!(
            ctx.clone().with_ownership_transferred("rr"),
            Err(PipelineError::OwnershipTransferred(_))
        ));
        assert!(matches!(
            ctx.callable_address("crystal"),
            Err(PipelineError::NotDeployed(_))
        ));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Done.can_advance_to(RunState::Aborted));
        assert!(!RunState::Aborted.can_advance_to(RunState::SignerReady));
        assert!(RunState::ContractsDeployed(3).can_advance_to(RunState::Aborted));
        assert!(!RunState::Idle.can_advance_to(RunState::Configured));
        assert!(!RunState::ContractsDeployed(1).can_advance_to(RunState::ContractsDeployed(3)));
    }

    #[test]
    fn test_duplicate_contract_is_rejected() {
        let ctx = RunContext::new("localhost", "1")
            .with_signer(identity())
            .unwrap()
            .with_contract(contract("rr", 1))
            .unwrap();
        assert!(matches!(
            ctx.with_contract(contract("rr", 2)),
            Err(PipelineError::AlreadyDeployed(_))
        ));
    }
}
