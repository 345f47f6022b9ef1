use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::{
    ArtifactStore, AutoConfirm, ConfirmationPort, DeploymentRecord, Interrupt, Pipeline,
    ProvisionPlan, RunReport, TerminalGate,
    signer::{AnySigner, SignerConfig, funding::LocalFunder},
};

/// The default name for the fallout configuration file.
pub const CONFIG_FILENAME: &str = "Fallout.toml";

/// Default chain RPC endpoint (local hardhat/anvil node).
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Default time to wait for a transaction receipt.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 600;

/// Everything needed to run a provisioning plan against a network.
///
/// This struct can be serialized to/from TOML format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Chain JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Signer selection and key material.
    pub signer: SignerConfig,
    /// Root of the compiled artifact tree (Hardhat `artifacts/` or Foundry `out/`).
    pub artifacts: PathBuf,
    /// Directory holding one sub-directory of records per network.
    pub record_dir: PathBuf,
    /// Seconds to wait for each receipt.
    pub confirmation_timeout_secs: u64,
    /// Provisioning plan to execute.
    pub plan: PathBuf,
    /// Earlier record to resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<PathBuf>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            rpc_url: Url::parse(DEFAULT_RPC_URL).expect("default rpc url is valid"),
            signer: SignerConfig::default(),
            artifacts: PathBuf::from("artifacts"),
            record_dir: PathBuf::from("deployments"),
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            plan: PathBuf::from("plans/localhost.toml"),
            resume: None,
        }
    }
}

impl Deployment {
    /// Save the configuration to a TOML file.
    ///
    /// Private keys and mnemonics are left out; they are supplied through the
    /// environment or the command line on every run.
    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let redacted = Self {
            signer: self.signer.redacted(),
            ..self.clone()
        };
        let content = toml::to_string_pretty(&redacted)
            .context("Failed to serialize deployment config to TOML")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, or from `Fallout.toml` inside a directory.
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file or directory not found: {}",
                path.display()
            ));
        }

        let config_path = Self::config_path(path);
        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        tracing::info!(path = %config_path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Resolve a `--config` argument: directories hold a `Fallout.toml`.
    pub fn config_path(path: &PathBuf) -> PathBuf {
        if path.is_dir() {
            path.join(CONFIG_FILENAME)
        } else {
            path.to_path_buf()
        }
    }

    /// Save the configuration next to the records (`<record_dir>/Fallout.toml`).
    pub fn save_config(&self) -> Result<PathBuf> {
        let config_path = self.record_dir.join(CONFIG_FILENAME);
        self.save_to_file(&config_path)?;
        Ok(config_path)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

impl Deployment {
    /// Run the plan. Operator gates wait on the terminal when `interactive`.
    pub async fn run(self, interactive: bool) -> Result<RunReport> {
        tracing::info!("Starting provisioning run...");

        let plan = ProvisionPlan::load_from_file(&self.plan)?;
        let timeout = self.confirmation_timeout();

        let signer = self
            .signer
            .build(self.rpc_url.clone(), timeout)
            .context("Failed to set up the signer")?;
        tracing::info!(kind = %self.signer.kind, rpc_url = %self.rpc_url, "Signer configured");

        let funder = if plan.should_fund_signer() {
            Some(LocalFunder::new(
                self.rpc_url.clone(),
                plan.fund_amount_wei()?,
                timeout,
            )?)
        } else {
            None
        };

        let previous = match &self.resume {
            Some(path) => {
                if !path.is_file() {
                    anyhow::bail!("Record to resume from not found: {}", path.display());
                }
                let record = DeploymentRecord::at(path)?;
                tracing::info!(path = %path.display(), facts = record.facts().len(), "Resuming from record");
                Some(record)
            }
            None => None,
        };

        let artifacts = ArtifactStore::new(&self.artifacts);

        if interactive {
            let pipeline = Pipeline::new(plan, signer, TerminalGate, artifacts, &self.record_dir);
            Self::prepare(pipeline, funder, previous).run().await
        } else {
            let pipeline = Pipeline::new(plan, signer, AutoConfirm, artifacts, &self.record_dir);
            Self::prepare(pipeline, funder, previous).run().await
        }
    }

    fn prepare<G: ConfirmationPort>(
        pipeline: Pipeline<AnySigner, G>,
        funder: Option<LocalFunder>,
        previous: Option<DeploymentRecord>,
    ) -> Pipeline<AnySigner, G> {
        let pipeline = pipeline.with_interrupt(Interrupt::on_ctrl_c());
        let pipeline = match funder {
            Some(funder) => pipeline.with_funder(funder),
            None => pipeline,
        };
        match previous {
            Some(previous) => pipeline.resume_from(previous),
            None => pipeline,
        }
    }
}
