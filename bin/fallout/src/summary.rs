use alloy_core::primitives::utils::format_ether;
use comfy_table::{Table, presets::UTF8_FULL};
use fallout_deploy::RunReport;

/// Render the contracts of a finished run and what it cost.
pub fn render(report: &RunReport) -> String {
    let ctx = &report.context;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Contract", "Address", "Source", "Owner"]);

    for contract in ctx.contracts() {
        let source = match contract.tx_hash {
            Some(hash) => format!("deployed ({hash})"),
            None => "attached".to_string(),
        };
        let owner = if ctx.is_transferred(&contract.id) {
            "transferred"
        } else {
            "deployer"
        };
        table.add_row(vec![
            contract.label.clone(),
            contract.address.to_string(),
            source,
            owner.to_string(),
        ]);
    }

    format!(
        "{table}\nNetwork: {}\nRecord: {}\nDeployment cost: {} Ether",
        ctx.network(),
        report.record_path.display(),
        format_ether(report.cost)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{Address, B256, U256};
    use fallout_deploy::{DeployedContract, RunContext, SignerIdentity};
    use std::path::PathBuf;

    #[test]
    fn test_render_lists_every_contract() {
        let ctx = RunContext::new("localhost", "20260101000000")
            .with_signer(SignerIdentity {
                address: Address::repeat_byte(1),
                chain_id: 31337,
                balance: U256::ZERO,
            })
            .unwrap()
            .with_contract(DeployedContract {
                id: "jungle".into(),
                label: "InsecureJungle".into(),
                address: Address::repeat_byte(2),
                args: vec![],
                tx_hash: None,
                attached: true,
            })
            .unwrap()
            .with_contract(DeployedContract {
                id: "crystal".into(),
                label: "FalloutCrystal".into(),
                address: Address::repeat_byte(3),
                args: vec![],
                tx_hash: Some(B256::repeat_byte(4)),
                attached: false,
            })
            .unwrap()
            .configured()
            .unwrap()
            .with_ownership_transferred("crystal")
            .unwrap()
            .done()
            .unwrap();

        let rendered = render(&RunReport {
            context: ctx,
            record_path: PathBuf::from("deployments/localhost/deployment-20260101000000.json"),
            cost: U256::from(1_500_000_000_000_000u64),
        });

        assert!(rendered.contains("InsecureJungle"));
        assert!(rendered.contains("attached"));
        assert!(rendered.contains("transferred"));
        assert!(rendered.contains("0.0015"));
        assert!(rendered.contains("deployment-20260101000000.json"));
    }
}
