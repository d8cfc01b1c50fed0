use crate::config::CascadeSettings;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Declaration of one cascade: which collection it reacts to, which fields
/// are relevant to it, and the settings it runs under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeDefinition {
    pub cascade_id: String,
    pub source_collection: String,
    pub relevant_fields: Vec<String>,
    #[serde(default)]
    pub settings: CascadeSettings,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Versioned bundle of cascade definitions deployed as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionBundle {
    pub bundle_version: u64,
    pub definitions: Vec<CascadeDefinition>,
}

/// Validation failures for definition documents.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("cascade id must not be empty")]
    EmptyCascadeId,
    #[error("cascade '{cascade_id}' names no source collection")]
    EmptySourceCollection { cascade_id: String },
    #[error("cascade '{cascade_id}' declares no relevant fields")]
    NoRelevantFields { cascade_id: String },
    #[error("cascade '{cascade_id}' declares a reserved relevant field '{field}'")]
    ReservedField { cascade_id: String, field: String },
    #[error("duplicate cascade id '{cascade_id}' in bundle")]
    DuplicateCascadeId { cascade_id: String },
    #[error("cascade '{cascade_id}' settings invalid: {source}")]
    InvalidSettings {
        cascade_id: String,
        source: crate::config::SettingsError,
    },
}

/// Validates a single definition document.
pub fn validate_definition(definition: &CascadeDefinition) -> Result<(), DefinitionError> {
    if definition.cascade_id.trim().is_empty() {
        return Err(DefinitionError::EmptyCascadeId);
    }
    if definition.source_collection.trim().is_empty() {
        return Err(DefinitionError::EmptySourceCollection {
            cascade_id: definition.cascade_id.clone(),
        });
    }
    if definition.relevant_fields.is_empty() {
        return Err(DefinitionError::NoRelevantFields {
            cascade_id: definition.cascade_id.clone(),
        });
    }
    for field in &definition.relevant_fields {
        if field == crate::document::PROVENANCE_FIELD {
            return Err(DefinitionError::ReservedField {
                cascade_id: definition.cascade_id.clone(),
                field: field.clone(),
            });
        }
    }
    definition
        .settings
        .validate()
        .map_err(|source| DefinitionError::InvalidSettings {
            cascade_id: definition.cascade_id.clone(),
            source,
        })
}

impl DefinitionBundle {
    /// Validates every definition plus bundle-level uniqueness.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen = BTreeSet::new();
        for definition in &self.definitions {
            validate_definition(definition)?;
            if !seen.insert(definition.cascade_id.clone()) {
                return Err(DefinitionError::DuplicateCascadeId {
                    cascade_id: definition.cascade_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Looks up a definition by cascade id.
    pub fn definition(&self, cascade_id: &str) -> Option<&CascadeDefinition> {
        self.definitions
            .iter()
            .find(|definition| definition.cascade_id == cascade_id)
    }
}

/// Computes the SHA256 hex digest of a byte slice.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(Sha256::digest(bytes)))
}

/// Computes the SHA256 hex digest of a file.
pub fn sha256_file(path: impl AsRef<Path>) -> Result<String> {
    let path_ref = path.as_ref();
    let data =
        fs::read(path_ref).with_context(|| format!("unable to read {}", path_ref.display()))?;
    Ok(sha256_bytes(&data))
}

/// Loads and validates a definition bundle from a JSON file.
pub fn load_bundle(path: impl AsRef<Path>) -> Result<DefinitionBundle> {
    let path_ref = path.as_ref();
    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("unable to read {}", path_ref.display()))?;
    let bundle: DefinitionBundle = serde_json::from_str(&data)
        .with_context(|| format!("invalid bundle document {}", path_ref.display()))?;
    bundle
        .validate()
        .with_context(|| format!("bundle {} failed validation", path_ref.display()))?;
    Ok(bundle)
}

/// Loads a bundle only when the file digest matches the pinned value.
pub fn load_bundle_pinned(path: impl AsRef<Path>, expected_digest: &str) -> Result<DefinitionBundle> {
    let path_ref = path.as_ref();
    let digest = sha256_file(path_ref)?;
    if digest != expected_digest {
        return Err(anyhow!(
            "digest mismatch for {}: expected {expected_digest}, found {digest}",
            path_ref.display()
        ));
    }
    load_bundle(path_ref)
}
