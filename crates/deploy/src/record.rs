//! Run-scoped, append-only deployment record.
//!
//! Every run writes its facts (addresses, arguments, transaction hashes, costs)
//! to `<dir>/<network>/deployment-<run_id>.json`. The file only ever grows: a
//! fact, once written, is never removed or changed, so an interrupted run still
//! leaves a usable trail for manual recovery.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::{Map, Value};

/// Format of the run identifier, e.g. `20220615123045`.
pub const RUN_ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Errors that make a record append refuse to write.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("record key '{key}' already holds {existing}, refusing to overwrite it with {new}")]
    Conflict {
        key: String,
        existing: Value,
        new: Value,
    },
    #[error("record file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),
}

/// Build a run identifier from the current UTC time.
pub fn new_run_id() -> String {
    chrono::Utc::now().format(RUN_ID_FORMAT).to_string()
}

/// Append-only record of one run.
#[derive(Debug, Clone)]
pub struct DeploymentRecord {
    path: PathBuf,
    facts: Map<String, Value>,
}

impl DeploymentRecord {
    /// Record for `run_id` on `network`, rooted at `dir`.
    ///
    /// Nothing is written until the first [`append`](Self::append). If a file
    /// already exists for this run, its facts are picked up and kept.
    pub fn for_run(dir: impl AsRef<Path>, network: &str, run_id: &str) -> Result<Self> {
        let path = dir
            .as_ref()
            .join(network)
            .join(format!("deployment-{run_id}.json"));
        Self::at(path)
    }

    /// Record stored at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let facts = if path.exists() {
            read_facts(&path)?
        } else {
            Map::new()
        };
        Ok(Self { path, facts })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Facts written so far, in insertion order.
    pub fn facts(&self) -> &Map<String, Value> {
        &self.facts
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.facts.get(key)
    }

    /// Merge `facts` into the record file.
    ///
    /// Re-appending an identical fact is a no-op. A different value under an
    /// existing key fails with [`RecordError::Conflict`] and nothing is written.
    pub fn append<I, K>(&mut self, facts: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let facts: Vec<(String, Value)> = facts.into_iter().map(|(k, v)| (k.into(), v)).collect();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create record directory {}", parent.display())
            })?;
        }

        let lock_path = sibling(&self.path, "lock");
        let lock = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("Failed to lock record {}", self.path.display()))?;

        let mut merged = if self.path.exists() {
            read_facts(&self.path)?
        } else {
            Map::new()
        };
        for (key, value) in self.facts.iter() {
            if !merged.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in facts {
            match merged.get(&key) {
                Some(existing) if *existing == value => {}
                Some(existing) => {
                    return Err(RecordError::Conflict {
                        key,
                        existing: existing.clone(),
                        new: value,
                    }
                    .into());
                }
                None => {
                    tracing::debug!(key = %key, value = %value, "Recording fact");
                    merged.insert(key, value);
                }
            }
        }

        // The record is replaced by a rename, so it is never seen half written.
        let json = serde_json::to_string_pretty(&merged).context("Failed to serialize record")?;
        let tmp_path = sibling(&self.path, "tmp");
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.sync_all()
            .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace record {}", self.path.display()))?;

        FileExt::unlock(&lock)
            .with_context(|| format!("Failed to unlock record {}", self.path.display()))?;

        self.facts = merged;
        Ok(())
    }

    /// Address stored under `key`, if any.
    pub fn address(&self, key: &str) -> Result<Option<Address>> {
        match self.facts.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(
                s.parse()
                    .with_context(|| format!("Record key '{key}' is not an address: {s}"))?,
            )),
            Some(other) => anyhow::bail!("Record key '{}' is not an address: {}", key, other),
        }
    }
}

/// `<record>.<suffix>` next to the record.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn read_facts(path: &Path) -> Result<Map<String, Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read record {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    parse_facts(&content, path)
}

fn parse_facts(content: &str, path: &Path) -> Result<Map<String, Value>> {
    match serde_json::from_str(content)
        .with_context(|| format!("Failed to parse record {}", path.display()))?
    {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject(path.to_path_buf()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempdir::TempDir;

    #[test]
    fn test_run_id_format() {
        let id = new_run_id();
        assert_eq!(id.len(), 14);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_file_created_lazily() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "localhost", "20220101000000")
            .unwrap();

        assert!(!record.path().exists());
        record.append([("network", json!("localhost"))]).unwrap();
        assert!(record.path().exists());
        assert_eq!(
            record.path(),
            temp_dir
                .path()
                .join("localhost/deployment-20220101000000.json")
        );
    }

    #[test]
    fn test_append_keeps_order_and_earlier_facts() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "mainnet", "1").unwrap();

        record.append([("date", json!("1")), ("network", json!("mainnet"))]).unwrap();
        record.append([("deployerAddress", json!("0xabc"))]).unwrap();

        let on_disk: Value =
            serde_json::from_str(&std::fs::read_to_string(record.path()).unwrap()).unwrap();
        let keys: Vec<&String> = on_disk.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["date", "network", "deployerAddress"]);
    }

    #[test]
    fn test_same_fact_twice_is_noop() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "mainnet", "1").unwrap();

        record.append([("network", json!("mainnet"))]).unwrap();
        record.append([("network", json!("mainnet"))]).unwrap();
        assert_eq!(record.facts().len(), 1);
    }

    #[test]
    fn test_conflicting_fact_is_rejected() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "mainnet", "1").unwrap();

        record.append([("crystalAddress", json!("0x01"))]).unwrap();
        let err = record
            .append([("other", json!(1)), ("crystalAddress", json!("0x02"))])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecordError>(),
            Some(RecordError::Conflict { .. })
        ));

        // nothing from the rejected batch reached the file
        let reread = DeploymentRecord::at(record.path()).unwrap();
        assert_eq!(reread.get("crystalAddress"), Some(&json!("0x01")));
        assert!(reread.get("other").is_none());
    }

    #[test]
    fn test_partial_record_of_same_run_is_merged() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut first = DeploymentRecord::for_run(temp_dir.path(), "rinkeby", "7").unwrap();
        first.append([("royaltyReceiverAddress", json!("0x01"))]).unwrap();

        let mut second = DeploymentRecord::for_run(temp_dir.path(), "rinkeby", "7").unwrap();
        second.append([("crystalAddress", json!("0x02"))]).unwrap();

        assert_eq!(second.facts().len(), 2);
        assert_eq!(second.get("royaltyReceiverAddress"), Some(&json!("0x01")));
    }

    #[test]
    fn test_address_lookup() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "mainnet", "1").unwrap();
        record
            .append([
                ("jungleAddress", json!("0x4d648c35212273d638a5e602ab1177bb75ad7946")),
                ("deploymentCost", json!(3)),
            ])
            .unwrap();

        assert!(record.address("jungleAddress").unwrap().is_some());
        assert!(record.address("missing").unwrap().is_none());
        assert!(record.address("deploymentCost").is_err());
    }

    #[test]
    fn test_leftover_temp_file_does_not_affect_the_record() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let mut record = DeploymentRecord::for_run(temp_dir.path(), "mainnet", "1").unwrap();
        record.append([("network", json!("mainnet"))]).unwrap();

        // A write killed before its rename leaves a partial temp file behind.
        let tmp_path = temp_dir.path().join("mainnet/deployment-1.json.tmp");
        std::fs::write(&tmp_path, "{\"network\": \"main").unwrap();

        let mut reopened = DeploymentRecord::at(record.path()).unwrap();
        assert_eq!(reopened.get("network"), Some(&json!("mainnet")));

        reopened.append([("chainId", json!(1))]).unwrap();
        assert!(!tmp_path.exists());

        let on_disk = DeploymentRecord::at(record.path()).unwrap();
        assert_eq!(on_disk.facts().len(), 2);
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        let temp_dir = TempDir::new("fallout-record").unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        assert!(DeploymentRecord::at(&path).is_err());
    }
}
