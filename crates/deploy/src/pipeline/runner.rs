//! Pipeline execution engine.

use std::path::PathBuf;

use alloy_core::primitives::{B256, U256, utils::format_ether};
use anyhow::{Context, Result};
use serde_json::{Value, json};

use super::{DeployedContract, PipelineError, RunContext};
use crate::{
    abi::{self, Arg, ArgSpec},
    artifact::ArtifactStore,
    gate::{ConfirmationPort, DEFAULT_PROMPT, GatePoint, Interrupt},
    plan::{CallSpec, ContractSpec, ProvisionPlan, TRANSFER_OWNERSHIP_SIGNATURE},
    record::{DeploymentRecord, new_run_id},
    signer::{Signer, funding::LocalFunder, resolve_identity},
    tx::{TxReceipt, TxRequest},
};

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub context: RunContext,
    pub record_path: PathBuf,
    /// Wei spent by the deployer over the run.
    pub cost: U256,
}

/// Executes a [`ProvisionPlan`] with a signer and a confirmation gate.
pub struct Pipeline<S, G> {
    plan: ProvisionPlan,
    signer: S,
    gate: G,
    artifacts: ArtifactStore,
    record_dir: PathBuf,
    run_id: String,
    funder: Option<LocalFunder>,
    previous: Option<DeploymentRecord>,
    interrupt: Interrupt,
    step: String,
    checkpoint: Option<RunContext>,
}

impl<S, G> Pipeline<S, G>
where
    S: Signer,
    G: ConfirmationPort,
{
    pub fn new(
        plan: ProvisionPlan,
        signer: S,
        gate: G,
        artifacts: ArtifactStore,
        record_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plan,
            signer,
            gate,
            artifacts,
            record_dir: record_dir.into(),
            run_id: new_run_id(),
            funder: None,
            previous: None,
            interrupt: Interrupt::new(),
            step: "idle".to_string(),
            checkpoint: None,
        }
    }

    /// Override the timestamp-derived run identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Fund the signer from a node account before anything else is sent.
    pub fn with_funder(mut self, funder: LocalFunder) -> Self {
        self.funder = Some(funder);
        self
    }

    /// Stop the run when `interrupt` fires, whatever step it is in.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Reuse what an earlier, interrupted run already did.
    ///
    /// Contracts whose address is in `previous` are attached instead of
    /// deployed. Calls and ownership transfers it recorded are skipped when
    /// their transaction succeeded, and sent again otherwise.
    pub fn resume_from(mut self, previous: DeploymentRecord) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Path of the record this run writes.
    pub fn record_path(&self) -> PathBuf {
        self.record_dir
            .join(&self.plan.network)
            .join(format!("deployment-{}.json", self.run_id))
    }

    /// Run the whole plan.
    ///
    /// Stops at the first failure; nothing after the failing step is sent.
    pub async fn run(mut self) -> Result<RunReport> {
        let mut record = DeploymentRecord::for_run(&self.record_dir, &self.plan.network, &self.run_id)?;
        let ctx = RunContext::new(self.plan.network.clone(), self.run_id.clone());

        match self.execute(ctx, &mut record).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let last = self
                    .checkpoint
                    .take()
                    .unwrap_or_else(|| RunContext::new(self.plan.network.clone(), self.run_id.clone()));
                tracing::error!(
                    step = %self.step,
                    last_state = %last.state(),
                    contracts = last.contracts().len(),
                    error = %format!("{e:#}"),
                    "Run aborted"
                );
                let last = last.aborted();
                tracing::debug!(state = %last.state(), "Run context closed");

                if record.path().exists() {
                    if let Err(record_err) = record.append([("abortedAt", json!(self.step))]) {
                        tracing::warn!(error = %record_err, "Failed to record the abort");
                    }
                }
                Err(e)
            }
        }
    }

    fn enter(&mut self, step: impl Into<String>) {
        self.step = step.into();
        tracing::debug!(step = %self.step, "Entering step");
    }

    fn checkpoint(&mut self, ctx: &RunContext) {
        self.checkpoint = Some(ctx.clone());
    }

    async fn execute(&mut self, ctx: RunContext, record: &mut DeploymentRecord) -> Result<RunReport> {
        tracing::info!("***************************");
        tracing::info!("*   Contract Deployment   *");
        tracing::info!("***************************");

        // Signer
        self.enter("signer");
        let identity = resolve_identity(&self.signer, self.plan.chain_id).await?;
        let ctx = ctx.with_signer(identity.clone())?;
        self.checkpoint(&ctx);

        if let Some(funder) = &self.funder {
            self.interrupt.check()?;
            let funded = funder.fund(identity.address).await?;
            tracing::info!(
                balance = %format_ether(funded.balance),
                "Signer funded"
            );
        }

        // Settings
        self.enter("settings");
        tracing::info!(
            network = %self.plan.network,
            chain_id = identity.chain_id,
            expected_chain_id = ?self.plan.chain_id,
            owner = %self.plan.owner,
            "Settings"
        );
        let mut facts: Vec<(String, Value)> = vec![
            ("date".to_string(), json!(self.run_id)),
            ("network".to_string(), json!(self.plan.network)),
            ("contractOwnerAddress".to_string(), json!(self.plan.owner)),
        ];
        facts.extend(self.plan.facts.iter().map(|(k, v)| (k.clone(), json!(v))));
        if let Some(previous) = &self.previous {
            facts.push((
                "resumedFrom".to_string(),
                json!(previous.path().display().to_string()),
            ));
        }
        record.append(facts)?;
        self.confirm_at(GatePoint::AfterSettings, None).await?;

        // Deployer
        self.enter("deployer");
        let initial_balance = self
            .signer
            .balance()
            .await
            .context("Failed to read deployer balance")?;
        tracing::info!(
            address = %identity.address,
            chain_id = identity.chain_id,
            balance = %format!("{} Ether", format_ether(initial_balance)),
            "Deployment wallet"
        );
        record.append([
            ("deployerAddress", json!(identity.address)),
            ("chainId", json!(identity.chain_id)),
            ("initialBalance", json!(format_ether(initial_balance))),
        ])?;
        self.confirm_at(GatePoint::AfterDeployer, None).await?;

        // Contracts, in dependency order
        let mut ctx = ctx;
        for spec in self.plan.contracts.clone() {
            self.enter(format!("deploy {}", spec.id));
            let (next, deployed) = self.provision_contract(ctx, &spec, record).await?;
            ctx = next;
            self.checkpoint(&ctx);
            if deployed {
                self.confirm_at(GatePoint::AfterContract, None).await?;
            }
        }

        // Configuration calls
        for call in self.plan.calls.clone() {
            self.enter(format!("call {}", call.label()));
            self.configure(&ctx, &call, record).await?;
        }
        let ctx = ctx.configured()?;
        self.checkpoint(&ctx);

        // Ownership transfer
        self.enter("ownership transfer");
        let ctx = self.transfer_ownership(ctx, record).await?;

        // Cost
        self.enter("cost");
        let final_balance = self
            .signer
            .balance()
            .await
            .context("Failed to read deployer balance")?;
        let cost = initial_balance.saturating_sub(final_balance);
        tracing::info!(cost = %format!("{} Ether", format_ether(cost)), "Deployment cost");
        record.append([("deploymentCost", json!(format_ether(cost)))])?;

        let ctx = ctx.done()?;
        tracing::info!(record = %record.path().display(), "Completed successfully");

        Ok(RunReport {
            context: ctx,
            record_path: record.path().to_path_buf(),
            cost,
        })
    }

    async fn confirm_at(&self, point: GatePoint, prompt: Option<&str>) -> Result<()> {
        self.interrupt.check()?;
        if self.plan.gates.is_enabled(point) {
            tokio::select! {
                confirmed = self.gate.confirm(prompt) => confirmed?,
                _ = self.interrupt.triggered() => return Err(PipelineError::Aborted.into()),
            }
        }
        Ok(())
    }

    /// Hand `tx` to the signer, unless the run was interrupted.
    async fn send(&self, tx: TxRequest) -> Result<B256> {
        self.interrupt.check()?;
        self.signer.sign_and_send(tx).await
    }

    /// Wait for the receipt of `hash`; an interrupt ends the wait.
    async fn receipt(&self, hash: B256) -> Result<TxReceipt> {
        tokio::select! {
            receipt = self.signer.wait_for_receipt(hash) => {
                receipt.with_context(|| format!("Transaction {hash} was not confirmed"))
            }
            _ = self.interrupt.triggered() => {
                tracing::warn!(tx_hash = %hash, "Stopped waiting for the transaction");
                Err(PipelineError::Aborted.into())
            }
        }
    }

    /// Wait for `hash` and fail if it reverted.
    async fn confirmed(&self, hash: B256) -> Result<TxReceipt> {
        let receipt = self.receipt(hash).await?;
        if !receipt.succeeded() {
            return Err(PipelineError::Reverted(hash).into());
        }
        tracing::debug!(
            tx_hash = %hash,
            block = ?receipt.block_number,
            gas_used = %receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }

    /// Transaction hash the resumed run recorded under `key`, if it succeeded.
    ///
    /// A reverted or unconfirmed transaction yields `None`, so the step is
    /// sent again.
    async fn resumed_success(&self, key: &str) -> Result<Option<B256>> {
        let Some(value) = self.previous.as_ref().and_then(|p| p.get(key)) else {
            return Ok(None);
        };
        let hash: B256 = serde_json::from_value(value.clone())
            .with_context(|| format!("Record key '{key}' is not a transaction hash: {value}"))?;

        match self.receipt(hash).await {
            Ok(receipt) if receipt.succeeded() => Ok(Some(hash)),
            Ok(_) => {
                tracing::warn!(key, tx_hash = %hash, "Recorded transaction reverted, sending it again");
                Ok(None)
            }
            Err(e) if matches!(e.downcast_ref::<PipelineError>(), Some(PipelineError::Aborted)) => {
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    key,
                    tx_hash = %hash,
                    error = %format!("{e:#}"),
                    "Recorded transaction was never confirmed, sending it again"
                );
                Ok(None)
            }
        }
    }

    fn resolve_args(ctx: &RunContext, specs: &[abi::ArgSpec]) -> Result<Vec<Arg>> {
        let lookup = |id: &str| ctx.address_of(id);
        specs.iter().map(|a| a.resolve(&lookup)).collect()
    }

    /// Deploy or attach one contract. The flag tells whether a transaction was sent.
    async fn provision_contract(
        &self,
        ctx: RunContext,
        spec: &ContractSpec,
        record: &mut DeploymentRecord,
    ) -> Result<(RunContext, bool)> {
        let args = Self::resolve_args(&ctx, &spec.args)
            .with_context(|| format!("Failed to resolve arguments of {}", spec.label()))?;
        let resumed = match &self.previous {
            Some(previous) => previous.address(&spec.record_key())?,
            None => None,
        };

        let (address, tx_hash) = if let Some(address) = spec.address.or(resumed) {
            tracing::info!(
                contract = spec.label(),
                address = %address,
                resumed = resumed.is_some(),
                "Using existing contract"
            );
            (address, None)
        } else {
            let artifact_name = spec
                .artifact
                .as_deref()
                .with_context(|| format!("Contract '{}' has no artifact", spec.id))?;
            let artifact = self.artifacts.load(artifact_name)?;
            let tx = TxRequest::create(abi::creation_code(&artifact.bytecode, &args));

            tracing::info!(contract = spec.label(), artifact = artifact_name, "Deploying contract...");
            let hash = self
                .send(tx)
                .await
                .with_context(|| format!("Failed to deploy {}", spec.label()))?;
            tracing::info!(contract = spec.label(), tx_hash = %hash, "Deployment transaction sent");

            let receipt = self.confirmed(hash).await?;
            let address = receipt
                .contract_address
                .ok_or(PipelineError::MissingContractAddress(hash))?;
            tracing::info!(contract = spec.label(), address = %address, "Contract deployed");
            (address, Some(hash))
        };

        let mut facts = vec![(spec.record_key(), json!(address))];
        if let Some(args_key) = &spec.args_key {
            facts.push((args_key.clone(), serde_json::to_value(&args)?));
        }
        record.append(facts)?;

        let ctx = ctx.with_contract(DeployedContract {
            id: spec.id.clone(),
            label: spec.label().to_string(),
            address,
            args,
            tx_hash,
            attached: tx_hash.is_none(),
        })?;
        Ok((ctx, tx_hash.is_some()))
    }

    async fn configure(
        &self,
        ctx: &RunContext,
        call: &CallSpec,
        record: &mut DeploymentRecord,
    ) -> Result<()> {
        let target = ctx.callable_address(&call.target)?;
        let key = call.record_key();

        if let Some(done) = self.resumed_success(&key).await? {
            tracing::info!(call = %call.label(), tx_hash = %done, "Already done in the resumed run, skipping");
            record.append([(key, json!(done))])?;
            return Ok(());
        }

        let lookup = |id: &str| ctx.address_of(id);
        let data = abi::encode_call(&call.signature, &call.args, &lookup)
            .with_context(|| format!("Failed to encode {}", call.label()))?;

        tracing::info!(call = %call.label(), target = %target, "Configuration call");
        self.confirm_at(GatePoint::BeforeCall, Some(DEFAULT_PROMPT)).await?;

        let hash = self
            .send(TxRequest::call(target, data))
            .await
            .with_context(|| format!("Failed to send {}", call.label()))?;
        tracing::info!(call = %call.label(), tx_hash = %hash, "Configuration transaction sent");
        record.append([(key, json!(hash))])?;

        self.confirmed(hash).await?;
        self.confirm_at(GatePoint::AfterCall, None).await?;
        Ok(())
    }

    async fn transfer_ownership(
        &mut self,
        mut ctx: RunContext,
        record: &mut DeploymentRecord,
    ) -> Result<RunContext> {
        let targets: Vec<ContractSpec> = self
            .plan
            .contracts
            .iter()
            .filter(|c| c.transfer_ownership)
            .cloned()
            .collect();
        if targets.is_empty() {
            return Ok(ctx);
        }

        let owner = self.plan.owner;
        tracing::info!(owner = %owner, "Transfer ownership");
        self.confirm_at(GatePoint::BeforeOwnershipTransfer, Some(DEFAULT_PROMPT))
            .await?;

        for spec in targets {
            let address = ctx.callable_address(&spec.id)?;
            let key = spec.ownership_record_key();

            if let Some(done) = self.resumed_success(&key).await? {
                tracing::info!(contract = spec.label(), tx_hash = %done, "Ownership already transferred in the resumed run");
                record.append([(key, json!(done))])?;
            } else {
                let owner = ArgSpec::Text(owner.to_string());
                let data = abi::encode_call(TRANSFER_OWNERSHIP_SIGNATURE, &[owner], &|_: &str| None)?;
                let hash = self
                    .send(TxRequest::call(address, data))
                    .await
                    .with_context(|| format!("Failed to transfer ownership of {}", spec.label()))?;
                tracing::info!(contract = spec.label(), tx_hash = %hash, "Ownership transaction sent");
                record.append([(key, json!(hash))])?;
                self.confirmed(hash).await?;
            }

            ctx = ctx.with_ownership_transferred(&spec.id)?;
            self.checkpoint(&ctx);
        }

        Ok(ctx)
    }
}
