use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fallout_deploy::{CONFIG_FILENAME, Deployment, SignerKind};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use url::Url;

/// Prefix of the environment variables read by the CLI.
const ENV_PREFIX: &str = "FALLOUT_";

/// Variables handled by clap alone; they do not map onto `Deployment` keys.
const CLI_ONLY_ENV: &[&str] = &[
    "verbosity",
    "config",
    "yes",
    "save_config",
    "signer",
    "device_url",
    "private_key",
    "mnemonic",
    "mnemonic_index",
];

#[derive(Parser)]
#[command(name = "fallout")]
#[command(
    author,
    version,
    about = "Deploy, configure and hand over the Fallout contracts"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "FALLOUT_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Fallout.toml configuration file, or a directory containing one.
    ///
    /// When not provided, ./Fallout.toml is used if it exists.
    #[arg(long, alias = "conf", env = "FALLOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The provisioning plan to execute.
    #[arg(short, long, env = "FALLOUT_PLAN")]
    pub plan: Option<PathBuf>,

    /// The chain JSON-RPC endpoint.
    #[arg(long, alias = "rpc", env = "FALLOUT_RPC_URL")]
    pub rpc_url: Option<Url>,

    /// The signer variant: `device` or `local`.
    #[arg(long, env = "FALLOUT_SIGNER")]
    pub signer: Option<SignerKind>,

    /// Endpoint of the signing device bridge.
    #[arg(long, env = "FALLOUT_DEVICE_URL")]
    pub device_url: Option<Url>,

    /// Hex private key for the local signer.
    #[arg(long, env = "FALLOUT_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Mnemonic for the local signer.
    #[arg(long, env = "FALLOUT_MNEMONIC", hide_env_values = true)]
    pub mnemonic: Option<String>,

    /// Derivation index used with `--mnemonic`.
    #[arg(long, env = "FALLOUT_MNEMONIC_INDEX")]
    pub mnemonic_index: Option<u32>,

    /// Root of the compiled contract artifacts.
    #[arg(long, env = "FALLOUT_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Directory where deployment records are written.
    #[arg(long, env = "FALLOUT_RECORD_DIR")]
    pub record_dir: Option<PathBuf>,

    /// Seconds to wait for each transaction receipt.
    #[arg(long, env = "FALLOUT_CONFIRMATION_TIMEOUT_SECS")]
    pub confirmation_timeout_secs: Option<u64>,

    /// Skip every confirmation prompt.
    #[arg(short, long, env = "FALLOUT_YES")]
    pub yes: bool,

    /// Resume from an earlier deployment record: contracts it lists are not redeployed.
    #[arg(long, env = "FALLOUT_RESUME")]
    pub resume: Option<PathBuf>,

    /// Save the effective configuration as Fallout.toml in the record directory.
    #[arg(long, env = "FALLOUT_SAVE_CONFIG")]
    pub save_config: bool,
}

/// Values set on the command line, layered over every other source.
#[derive(Debug, Default, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    rpc_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifacts: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confirmation_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resume: Option<PathBuf>,
    signer: SignerOverrides,
}

#[derive(Debug, Default, Serialize)]
struct SignerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<SignerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mnemonic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mnemonic_index: Option<u32>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            rpc_url: self.rpc_url.clone(),
            artifacts: self.artifacts.clone(),
            record_dir: self.record_dir.clone(),
            confirmation_timeout_secs: self.confirmation_timeout_secs,
            plan: self.plan.clone(),
            resume: self.resume.clone(),
            signer: SignerOverrides {
                kind: self.signer,
                device_url: self.device_url.clone(),
                private_key: self.private_key.clone(),
                mnemonic: self.mnemonic.clone(),
                mnemonic_index: self.mnemonic_index,
            },
        }
    }

    /// The config file to layer in, if any.
    fn config_file(&self) -> Result<Option<PathBuf>> {
        match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file or directory not found: {}",
                        path.display()
                    );
                }
                Ok(Some(Deployment::config_path(path)))
            }
            None => {
                let default = PathBuf::from(CONFIG_FILENAME);
                Ok(default.is_file().then_some(default))
            }
        }
    }

    /// Build the effective configuration: defaults, then the config file,
    /// then `FALLOUT_*` variables, then command-line flags.
    pub fn deployment(&self) -> Result<Deployment> {
        let mut figment = Figment::from(Serialized::defaults(Deployment::default()));

        if let Some(path) = self.config_file()? {
            tracing::info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).ignore(CLI_ONLY_ENV))
            .merge(Serialized::defaults(self.overrides()))
            .extract()
            .context("Invalid configuration")
    }
}
