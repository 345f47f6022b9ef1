//! Loading compiled contract bytecode from Hardhat or Foundry build outputs.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;

/// The `bytecode` field of an artifact.
///
/// Hardhat stores the hex string directly, Foundry wraps it in `{ "object": ... }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Plain(String),
    Object { object: String },
}

#[derive(Debug, Deserialize)]
struct ArtifactFile {
    bytecode: BytecodeField,
}

/// Compiled contract ready for deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub bytecode: Bytes,
}

/// Looks artifacts up by contract name under a build directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find and parse the artifact for contract `name`.
    pub fn load(&self, name: &str) -> Result<Artifact> {
        let path = find_artifact(&self.root, name)?.with_context(|| {
            format!(
                "No artifact named {}.json under {}. Compile the contracts first.",
                name,
                self.root.display()
            )
        })?;

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        let hex_code = match file.bytecode {
            BytecodeField::Plain(s) => s,
            BytecodeField::Object { object } => object,
        };
        let bytecode: Bytes = hex_code
            .parse()
            .with_context(|| format!("Invalid bytecode in {}", path.display()))?;

        if bytecode.is_empty() {
            anyhow::bail!(
                "Artifact {} has no bytecode (interface or abstract contract?)",
                path.display()
            );
        }

        tracing::debug!(
            contract = name,
            path = %path.display(),
            size = bytecode.len(),
            "Loaded contract artifact"
        );

        Ok(Artifact {
            name: name.to_string(),
            path,
            bytecode,
        })
    }
}

/// Depth-first search for `<name>.json`, skipping Hardhat debug files.
fn find_artifact(dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    let file_name = format!("{name}.json");
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read artifacts directory {}", dir.display()))?;

    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|f| f == file_name.as_str()) {
            return Ok(Some(path));
        }
    }

    subdirs.sort();
    for sub in subdirs {
        if let Some(found) = find_artifact(&sub, name)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_load_hardhat_artifact() {
        let temp_dir = TempDir::new("fallout-artifacts").unwrap();
        let dir = temp_dir.path().join("contracts/FalloutCrystal.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("FalloutCrystal.json"),
            r#"{"contractName":"FalloutCrystal","bytecode":"0x6080604052"}"#,
        )
        .unwrap();
        std::fs::write(dir.join("FalloutCrystal.dbg.json"), r#"{"buildInfo":"x"}"#).unwrap();

        let artifact = ArtifactStore::new(temp_dir.path())
            .load("FalloutCrystal")
            .unwrap();
        assert_eq!(artifact.bytecode.as_ref(), &[0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[test]
    fn test_load_foundry_artifact() {
        let temp_dir = TempDir::new("fallout-artifacts").unwrap();
        let dir = temp_dir.path().join("FalloutFreaks.sol");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("FalloutFreaks.json"),
            r#"{"bytecode":{"object":"0x6080","linkReferences":{}}}"#,
        )
        .unwrap();

        let artifact = ArtifactStore::new(temp_dir.path())
            .load("FalloutFreaks")
            .unwrap();
        assert_eq!(artifact.bytecode.len(), 2);
    }

    #[test]
    fn test_missing_and_empty_artifacts() {
        let temp_dir = TempDir::new("fallout-artifacts").unwrap();
        std::fs::write(temp_dir.path().join("IJungle.json"), r#"{"bytecode":"0x"}"#).unwrap();

        let store = ArtifactStore::new(temp_dir.path());
        assert!(store.load("Missing").is_err());
        assert!(store.load("IJungle").is_err());
    }
}
