//! Mapping file backend
//!
//! Plain text, one app per line:
//!
//! ```text
//! com.example.app,12345,Example App
//! ```
//!
//! Lines without exactly three fields are skipped. Later lines win over
//! earlier ones with the same identifier.

use crate::config::LookupKind;
use crate::error::{Error, Result};
use crate::resolve::{IdentitySource, LookupKey};
use crate::types::AppIdentity;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Resolves identifiers from a `bundle_id,identifier,display_name` file.
pub struct MappingFileSource {
    path: PathBuf,
}

impl MappingFileSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl IdentitySource for MappingFileSource {
    fn kind(&self) -> LookupKind {
        LookupKind::File
    }

    fn key_space(&self) -> LookupKey {
        LookupKey::AdamId
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn lookup(&self, keys: &BTreeSet<String>) -> Result<HashMap<String, AppIdentity>> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            Error::Lookup(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let content = String::from_utf8_lossy(&bytes);

        let (mut identities, skipped) = parse_mapping(&content);
        if skipped > 0 {
            tracing::debug!(
                path = %self.path.display(),
                skipped,
                "Skipped malformed mapping lines"
            );
        }

        identities.retain(|k, _| keys.contains(k));
        Ok(identities)
    }
}

/// Parse mapping file content.
///
/// Returns the identities keyed by trimmed identifier and the number of lines
/// skipped for having the wrong field count.
pub fn parse_mapping(content: &str) -> (HashMap<String, AppIdentity>, usize) {
    let mut identities = HashMap::new();
    let mut skipped = 0;

    for line in content.lines() {
        let parts: Vec<&str> = line.trim().split(',').collect();
        let [bundle_id, identifier, name] = parts.as_slice() else {
            skipped += 1;
            continue;
        };

        let identifier = identifier.trim();
        identities.insert(
            identifier.to_string(),
            AppIdentity::new(identifier, name.trim(), bundle_id.trim()),
        );
    }

    (identities, skipped)
}
