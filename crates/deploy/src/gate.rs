//! Human-in-the-loop confirmation between irreversible steps.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};

use crate::pipeline::PipelineError;

/// Prompt shown when a gate has nothing more specific to say.
pub const DEFAULT_PROMPT: &str = "Press Enter to continue or Ctrl-C to cancel";

/// Suspends the pipeline until the operator lets it continue.
pub trait ConfirmationPort: Send + Sync {
    /// Resolve to `Ok(())` to continue, or fail with [`PipelineError::Aborted`].
    fn confirm(&self, prompt: Option<&str>) -> impl Future<Output = Result<()>> + Send;
}

/// Waits for Enter on stdin; a closed stdin aborts the run.
///
/// Ctrl-C is handled by the run-wide [`Interrupt`], not by the gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalGate;

impl ConfirmationPort for TerminalGate {
    async fn confirm(&self, prompt: Option<&str>) -> Result<()> {
        tracing::info!("{}", prompt.unwrap_or(DEFAULT_PROMPT));

        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());

        match stdin.read_line(&mut line).await {
            Ok(0) => {
                tracing::warn!("Standard input closed, aborting");
                Err(PipelineError::Aborted.into())
            }
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow::Error::from(e).context("Failed to read confirmation")),
        }
    }
}

/// Operator interrupt shared by every step of a run.
///
/// Once triggered it stays triggered: gates and receipt waits end with
/// [`PipelineError::Aborted`] and no further transaction is sent.
#[derive(Debug, Clone)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    /// An interrupt that only fires through [`trigger`](Self::trigger).
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    /// An interrupt fired by Ctrl-C at any point of the run.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_ctrl_c() -> Self {
        let interrupt = Self::new();
        let listener = interrupt.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupted by operator, no further transaction will be sent");
                    listener.trigger();
                }
                Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        });
        interrupt
    }

    pub fn trigger(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag.borrow()
    }

    /// Fail with [`PipelineError::Aborted`] once triggered.
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            return Err(PipelineError::Aborted.into());
        }
        Ok(())
    }

    /// Resolve once the interrupt fires.
    pub async fn triggered(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Always continues. Used for unattended runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl ConfirmationPort for AutoConfirm {
    async fn confirm(&self, prompt: Option<&str>) -> Result<()> {
        if let Some(prompt) = prompt {
            tracing::debug!(prompt, "Auto-confirmed");
        }
        Ok(())
    }
}

/// Where in the run a gate may stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoint {
    AfterSettings,
    AfterDeployer,
    AfterContract,
    BeforeCall,
    AfterCall,
    BeforeOwnershipTransfer,
}

/// Which gate points are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub after_settings: bool,
    pub after_deployer: bool,
    pub after_contract: bool,
    pub before_call: bool,
    pub after_call: bool,
    pub before_ownership_transfer: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            after_settings: true,
            after_deployer: true,
            after_contract: true,
            before_call: true,
            after_call: true,
            before_ownership_transfer: true,
        }
    }
}

impl GatePolicy {
    pub fn is_enabled(&self, point: GatePoint) -> bool {
        match point {
            GatePoint::AfterSettings => self.after_settings,
            GatePoint::AfterDeployer => self.after_deployer,
            GatePoint::AfterContract => self.after_contract,
            GatePoint::BeforeCall => self.before_call,
            GatePoint::AfterCall => self.after_call,
            GatePoint::BeforeOwnershipTransfer => self.before_ownership_transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_to_all_gates() {
        let policy = GatePolicy::default();
        for point in [
            GatePoint::AfterSettings,
            GatePoint::AfterDeployer,
            GatePoint::AfterContract,
            GatePoint::BeforeCall,
            GatePoint::AfterCall,
            GatePoint::BeforeOwnershipTransfer,
        ] {
            assert!(policy.is_enabled(point));
        }
    }

    #[test]
    fn test_partial_policy_from_toml() {
        let policy: GatePolicy = toml::from_str("after_contract = false\nafter_call = false").unwrap();
        assert!(policy.after_settings);
        assert!(!policy.is_enabled(GatePoint::AfterContract));
        assert!(!policy.is_enabled(GatePoint::AfterCall));
    }

    #[tokio::test]
    async fn test_interrupt_stays_triggered() {
        let interrupt = Interrupt::new();
        assert!(interrupt.check().is_ok());

        let waiter = {
            let interrupt = interrupt.clone();
            tokio::spawn(async move { interrupt.triggered().await })
        };
        interrupt.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        let err = interrupt.check().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Aborted)
        ));
        // Already fired: later waits return at once.
        tokio::time::timeout(std::time::Duration::from_secs(1), interrupt.triggered())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_auto_confirm_continues() {
        assert!(AutoConfirm.confirm(Some("Deploy?")).await.is_ok());
        assert!(AutoConfirm.confirm(None).await.is_ok());
    }
}
