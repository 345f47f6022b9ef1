//! Provisioning plans: which contracts to deploy, in which order, and what to
//! configure on them afterwards.
//!
//! A plan is a TOML file edited per deployment. Contracts are listed in
//! dependency order; an argument may reference an earlier contract with
//! `@<id>`, which keeps the dependency graph acyclic by construction.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use alloy_core::primitives::{Address, U256, utils::parse_ether};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    abi::{self, ArgSpec},
    gate::GatePolicy,
    signer::funding::is_local_network,
};

/// Signature of the ownership transfer issued at the end of every run.
pub const TRANSFER_OWNERSHIP_SIGNATURE: &str = "transferOwnership(address)";

/// Record keys the pipeline writes itself; plans may not claim them.
pub const RESERVED_RECORD_KEYS: &[&str] = &[
    "date",
    "network",
    "contractOwnerAddress",
    "resumedFrom",
    "deployerAddress",
    "chainId",
    "initialBalance",
    "deploymentCost",
    "abortedAt",
];

/// Amount of test ether sent to the signer on local networks.
pub const DEFAULT_FUND_AMOUNT: &str = "200";

/// A contract of the plan: either deployed by the run, or already on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Identifier used in `@<id>` references and call targets.
    pub id: String,
    /// Artifact (contract) name. Required unless `address` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Human-readable name for logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    /// Record key for the address. Defaults to `<id>Address`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    /// Record key for the resolved constructor arguments, if they should be kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_key: Option<String>,
    /// Pre-existing deployment; the contract is attached instead of deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Hand ownership to the plan owner at the end of the run.
    #[serde(default)]
    pub transfer_ownership: bool,
}

impl ContractSpec {
    pub fn label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.artifact.as_deref())
            .unwrap_or(&self.id)
    }

    pub fn record_key(&self) -> String {
        self.record_key
            .clone()
            .unwrap_or_else(|| format!("{}Address", self.id))
    }

    pub fn ownership_record_key(&self) -> String {
        format!("{}OwnershipTxHash", self.id)
    }

    pub fn is_attached(&self) -> bool {
        self.address.is_some()
    }
}

/// A configuration call against a contract of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Id of the target contract.
    pub target: String,
    /// Canonical function signature, e.g. `setBaseURI(string)`.
    pub signature: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Record key for the transaction hash. Defaults to `<target>.<function>TxHash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
}

impl CallSpec {
    pub fn function_name(&self) -> &str {
        self.signature
            .split_once('(')
            .map(|(name, _)| name.trim().trim_start_matches("function "))
            .unwrap_or(&self.signature)
    }

    pub fn label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{} on {}", self.function_name(), self.target))
    }

    pub fn record_key(&self) -> String {
        self.record_key
            .clone()
            .unwrap_or_else(|| format!("{}.{}TxHash", self.target, self.function_name()))
    }
}

/// A complete provisioning plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionPlan {
    /// Network name; selects the record sub-directory.
    pub network: String,
    /// Chain the signer must be on. Unchecked when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// Long-term custodian receiving ownership of the contracts.
    pub owner: Address,
    /// Extra facts recorded with the settings (e.g. `signerAddress`).
    #[serde(default)]
    pub facts: BTreeMap<String, String>,
    /// Fund the signer from a node account. Defaults to true on local networks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fund_signer: Option<bool>,
    /// Ether sent when funding the signer.
    #[serde(default = "default_fund_amount")]
    pub fund_amount: String,
    #[serde(default)]
    pub gates: GatePolicy,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    #[serde(default)]
    pub calls: Vec<CallSpec>,
}

fn default_fund_amount() -> String {
    DEFAULT_FUND_AMOUNT.to_string()
}

impl ProvisionPlan {
    /// Parse and validate a plan from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        let plan: Self = toml::from_str(content).context("Failed to parse plan as TOML")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Load and validate a plan file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan from {}", path.display()))?;
        let plan = Self::from_toml(&content)
            .with_context(|| format!("Invalid plan {}", path.display()))?;
        tracing::info!(path = %path.display(), network = %plan.network, "Plan loaded");
        Ok(plan)
    }

    pub fn should_fund_signer(&self) -> bool {
        self.fund_signer
            .unwrap_or_else(|| is_local_network(&self.network))
    }

    pub fn fund_amount_wei(&self) -> Result<U256> {
        parse_ether(&self.fund_amount)
            .with_context(|| format!("Invalid fund amount: {}", self.fund_amount))
    }

    pub fn contract(&self, id: &str) -> Option<&ContractSpec> {
        self.contracts.iter().find(|c| c.id == id)
    }

    /// Check the plan is executable before any transaction is sent.
    pub fn validate(&self) -> Result<()> {
        if self.network.trim().is_empty() {
            anyhow::bail!("Plan network must not be empty");
        }
        self.fund_amount_wei()?;

        let mut seen: HashSet<&str> = HashSet::new();
        let mut record_keys: HashSet<String> = HashSet::new();
        let mut claim = |key: String, owner: &str| -> Result<()> {
            if RESERVED_RECORD_KEYS.contains(&key.as_str()) {
                anyhow::bail!("Record key '{key}' of {owner} is written by every run");
            }
            if !record_keys.insert(key.clone()) {
                anyhow::bail!("Record key '{key}' of {owner} is already used");
            }
            Ok(())
        };

        for key in self.facts.keys() {
            claim(key.clone(), "the facts")?;
        }
        for contract in self.contracts.iter().filter(|c| c.transfer_ownership) {
            claim(
                contract.ownership_record_key(),
                &format!("the ownership transfer of '{}'", contract.id),
            )?;
        }

        for contract in &self.contracts {
            if contract.id.is_empty() || contract.id.contains(char::is_whitespace) {
                anyhow::bail!("Invalid contract id '{}'", contract.id);
            }
            if contract.artifact.is_none() && contract.address.is_none() {
                anyhow::bail!(
                    "Contract '{}' needs either an artifact to deploy or an existing address",
                    contract.id
                );
            }
            for reference in contract.args.iter().flat_map(|a| a.references()) {
                if !seen.contains(reference) {
                    anyhow::bail!(
                        "Contract '{}' references '{}', which is not listed before it",
                        contract.id,
                        reference
                    );
                }
            }
            if !seen.insert(contract.id.as_str()) {
                anyhow::bail!("Duplicate contract id '{}'", contract.id);
            }
            let owner = format!("contract '{}'", contract.id);
            for key in std::iter::once(contract.record_key()).chain(contract.args_key.clone()) {
                claim(key, &owner)?;
            }
        }

        for call in &self.calls {
            if !seen.contains(call.target.as_str()) {
                anyhow::bail!(
                    "Call {} targets unknown contract '{}'",
                    call.signature,
                    call.target
                );
            }
            let function = abi::parse_function(&call.signature)?;
            if function.signature() == TRANSFER_OWNERSHIP_SIGNATURE {
                anyhow::bail!(
                    "Ownership transfer is issued at the end of the run; set transfer_ownership on '{}' instead",
                    call.target
                );
            }
            for reference in call.args.iter().flat_map(|a| a.references()) {
                if !seen.contains(reference) {
                    anyhow::bail!(
                        "Call {} references unknown contract '{}'",
                        call.signature,
                        reference
                    );
                }
            }
            abi::check_call(&call.signature, &call.args)
                .with_context(|| format!("Invalid arguments for {}", call.label()))?;
            claim(call.record_key(), &format!("call {}", call.label()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
network = "localhost"
owner = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"

[facts]
signerAddress = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC"

[[contracts]]
id = "royalty_receiver"
artifact = "FalloutFreaksRoyaltyReceiver"
label = "Royalty Receiver"
record_key = "royaltyReceiverAddress"
transfer_ownership = true

[[contracts]]
id = "jungle"
address = "0x4d648c35212273d638a5e602ab1177bb75ad7946"

[[contracts]]
id = "crystal"
artifact = "FalloutCrystal"
args = ["0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC", "@royalty_receiver", "@jungle", []]
args_key = "crystalArgs"
transfer_ownership = true

[[calls]]
target = "crystal"
signature = "setBaseURI(string)"
args = ["https://example.com/"]
"#;

    #[test]
    fn test_parse_plan() {
        let plan = ProvisionPlan::from_toml(PLAN).unwrap();

        assert_eq!(plan.contracts.len(), 3);
        assert!(plan.should_fund_signer());
        assert_eq!(plan.fund_amount_wei().unwrap(), parse_ether("200").unwrap());
        assert!(plan.gates.after_settings);

        let crystal = plan.contract("crystal").unwrap();
        assert_eq!(crystal.record_key(), "crystalAddress");
        assert_eq!(crystal.args.len(), 4);
        assert!(plan.contract("jungle").unwrap().is_attached());

        let call = &plan.calls[0];
        assert_eq!(call.function_name(), "setBaseURI");
        assert_eq!(call.record_key(), "crystal.setBaseURITxHash");
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let plan = PLAN.replace("\"@royalty_receiver\", \"@jungle\"", "\"@freaks\", \"@jungle\"");
        let err = ProvisionPlan::from_toml(&plan).unwrap_err();
        assert!(err.to_string().contains("freaks") || format!("{err:#}").contains("freaks"));
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let plan = format!(
            "{PLAN}\n[[contracts]]\nid = \"jungle\"\naddress = \"0x4d648c35212273d638a5e602ab1177bb75ad7946\"\n"
        );
        assert!(ProvisionPlan::from_toml(&plan).is_err());
    }

    #[test]
    fn test_transfer_ownership_call_is_rejected() {
        let plan = format!(
            "{PLAN}\n[[calls]]\ntarget = \"crystal\"\nsignature = \"transferOwnership(address)\"\nargs = [\"0x70997970C51812dc3A010C7d01b50e0d17dc79C8\"]\n"
        );
        assert!(ProvisionPlan::from_toml(&plan).is_err());
    }

    #[test]
    fn test_call_arity_is_validated() {
        let plan = PLAN.replace("args = [\"https://example.com/\"]", "args = []");
        assert!(ProvisionPlan::from_toml(&plan).is_err());
    }

    #[test]
    fn test_call_argument_types_are_validated() {
        let plan = PLAN.replace(
            "signature = \"setBaseURI(string)\"",
            "signature = \"setAdminPermission(address)\"",
        );
        let err = ProvisionPlan::from_toml(&plan).unwrap_err();
        assert!(format!("{err:#}").contains("setAdminPermission"));
    }

    #[test]
    fn test_fact_cannot_shadow_a_contract_address() {
        let plan = PLAN.replace(
            "[facts]\n",
            "[facts]\ncrystalAddress = \"0x0000000000000000000000000000000000000001\"\n",
        );
        let err = ProvisionPlan::from_toml(&plan).unwrap_err();
        assert!(err.to_string().contains("crystalAddress"));
    }

    #[test]
    fn test_reserved_record_keys_are_rejected() {
        let fact = PLAN.replace("[facts]\n", "[facts]\ndeploymentCost = \"0\"\n");
        assert!(ProvisionPlan::from_toml(&fact).is_err());

        let args_key = PLAN.replace("args_key = \"crystalArgs\"", "args_key = \"chainId\"");
        assert!(ProvisionPlan::from_toml(&args_key).is_err());

        let ownership = PLAN.replace(
            "record_key = \"royaltyReceiverAddress\"",
            "record_key = \"crystalOwnershipTxHash\"",
        );
        let err = ProvisionPlan::from_toml(&ownership).unwrap_err();
        assert!(err.to_string().contains("crystalOwnershipTxHash"));

        let call_key = format!("{PLAN}record_key = \"abortedAt\"\n");
        assert!(ProvisionPlan::from_toml(&call_key).is_err());
    }

    #[test]
    fn test_contract_without_artifact_or_address() {
        let plan = format!("{PLAN}\n[[contracts]]\nid = \"ghost\"\n");
        assert!(ProvisionPlan::from_toml(&plan).is_err());
    }

    #[test]
    fn test_shipped_plans_are_valid() {
        for (name, content) in [
            ("mainnet", include_str!("../../../plans/mainnet.toml")),
            ("localhost", include_str!("../../../plans/localhost.toml")),
            ("rinkeby-crystal", include_str!("../../../plans/rinkeby-crystal.toml")),
            ("rinkeby-freaks", include_str!("../../../plans/rinkeby-freaks.toml")),
        ] {
            let plan = ProvisionPlan::from_toml(content)
                .unwrap_or_else(|e| panic!("plan {name} is invalid: {e:#}"));
            assert!(plan.contracts.iter().any(|c| c.transfer_ownership), "{name}");
        }

        let test_mint = ProvisionPlan::from_toml(include_str!(
            "../../../plans/localhost-test-mint-details.toml"
        ))
        .unwrap();
        assert_eq!(test_mint.contracts.len(), 1);
        assert_eq!(test_mint.contracts[0].record_key(), "testMintDetailsAddress");
        assert!(test_mint.calls.is_empty());
        assert!(!test_mint.contracts[0].transfer_ownership);

        let mainnet = ProvisionPlan::from_toml(include_str!("../../../plans/mainnet.toml")).unwrap();
        assert_eq!(mainnet.chain_id, Some(1));
        assert!(!mainnet.should_fund_signer());
        assert_eq!(mainnet.calls.len(), 3);
        assert_eq!(mainnet.contract("crystal").unwrap().args.len(), 6);
        assert_eq!(mainnet.contract("fallout").unwrap().args.len(), 8);
    }

    #[test]
    fn test_mainnet_does_not_fund_by_default() {
        let plan = PLAN.replace("network = \"localhost\"", "network = \"mainnet\"");
        let plan = ProvisionPlan::from_toml(&plan).unwrap();
        assert!(!plan.should_fund_signer());
    }
}
