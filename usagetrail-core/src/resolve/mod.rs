//! Identity resolution
//!
//! Maps App Store identifiers to display names and bundle ids. Three
//! interchangeable backends implement [`IdentitySource`]:
//!
//! ```text
//!                        ┌─────────────────────────────┐
//!  identifiers ────────► │      IdentityResolver       │ ───► IdentityMap
//!                        └─────────────────────────────┘
//!                                       │
//!                         ┌─────────────┼──────────────┐
//!                         ▼             ▼              ▼
//!                  MappingFileSource StoreDbSource CatalogSource
//!                   (AdamID keys)   (AdamID keys)  (bundle id keys)
//! ```
//!
//! Events carry AdamIDs. A backend keyed by bundle id is reached through a
//! bridge, a local AdamID backend that supplies the bundle id for each
//! identifier:
//!
//! ```text
//!  AdamIDs ──► bridge ──► bundle ids ──► CatalogSource ──► names
//!     ▲                                                      │
//!     └──────────────── keyed back by AdamID ◄───────────────┘
//! ```
//!
//! Enrichment is best effort. A backend that fails is logged and treated as
//! having resolved nothing; every identifier then maps to the
//! `("Unknown App", "Unknown Bundle ID")` sentinel.

pub mod sources;

use crate::config::{Config, LookupKind};
use crate::error::{Error, Result};
use crate::types::{AppIdentity, UNKNOWN_BUNDLE_ID};
use std::collections::{BTreeSet, HashMap};

/// Key space a backend is indexed by.
///
/// The catalog is keyed by bundle id while the local backends are keyed by
/// AdamID. AdamIDs are never sent to a bundle id backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupKey {
    #[default]
    AdamId,
    BundleId,
}

/// A backend that can resolve a batch of keys.
///
/// ## Error Handling
///
/// Return `Err` when the backend itself is unusable (file missing, query
/// failure, network error). Keys that simply are not present must be left out
/// of the returned map, not reported as errors.
pub trait IdentitySource: Send + Sync {
    /// Which configured backend this is
    fn kind(&self) -> LookupKind;

    /// Key space the returned map is indexed by
    fn key_space(&self) -> LookupKey;

    /// Human-readable location for logs (path or URL)
    fn location(&self) -> String;

    /// Resolve `keys`, returning identities for the ones found.
    fn lookup(&self, keys: &BTreeSet<String>) -> Result<HashMap<String, AppIdentity>>;
}

/// Identities resolved for one run, keyed by AdamID.
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    identities: HashMap<String, AppIdentity>,
}

impl IdentityMap {
    pub fn new(identities: HashMap<String, AppIdentity>) -> Self {
        let identities = identities
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v))
            .collect();
        Self { identities }
    }

    /// Identity for an identifier, or the unknown sentinel.
    pub fn get(&self, identifier: &str) -> AppIdentity {
        let key = identifier.trim();
        self.identities
            .get(key)
            .cloned()
            .unwrap_or_else(|| AppIdentity::unknown(key))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.identities.contains_key(identifier.trim())
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Identifiers from `identifiers` that have no identity.
    pub fn unresolved<'a, I>(&self, identifiers: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        identifiers
            .into_iter()
            .filter(|id| !self.contains(id))
            .cloned()
            .collect()
    }
}

/// Outcome of a resolution pass.
#[derive(Debug, Default)]
pub struct Resolution {
    pub identities: IdentityMap,
    /// Backend used, `None` when no lookup source was configured
    pub kind: Option<LookupKind>,
    /// Backend failure that forced the empty mapping
    pub error: Option<String>,
}

impl Resolution {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

/// Resolves identifiers through the configured backend.
pub struct IdentityResolver {
    source: Option<Box<dyn IdentitySource>>,
    bridge: Option<Box<dyn IdentitySource>>,
}

impl IdentityResolver {
    /// Resolver that knows no identities.
    pub fn none() -> Self {
        Self {
            source: None,
            bridge: None,
        }
    }

    pub fn with_source(source: Box<dyn IdentitySource>) -> Self {
        Self {
            source: Some(source),
            bridge: None,
        }
    }

    /// Attach the AdamID backend that translates identifiers to bundle ids
    /// for a source keyed by bundle id.
    pub fn with_bridge(mut self, bridge: Box<dyn IdentitySource>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Build the resolver selected by `config`.
    ///
    /// Fails only on invalid configuration; unreachable backends are handled
    /// later by [`Self::resolve`].
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(kind) = config.lookup.effective_kind(&config.catalog) else {
            return Ok(Self::none());
        };

        let source = sources::create_source(kind, config)?;
        let bridged = source.key_space() == LookupKey::BundleId;
        let resolver = Self::with_source(source);

        match sources::create_bridge(config) {
            Some(bridge) if bridged => Ok(resolver.with_bridge(bridge)),
            _ => Ok(resolver),
        }
    }

    pub fn kind(&self) -> Option<LookupKind> {
        self.source.as_ref().map(|s| s.kind())
    }

    /// Resolve a set of identifiers. Never fails.
    pub fn resolve(&self, identifiers: &BTreeSet<String>) -> Resolution {
        let source = match &self.source {
            Some(source) => source,
            None => {
                tracing::info!("No lookup source configured; identities will be unknown");
                return Resolution::default();
            }
        };

        let keys: BTreeSet<String> = identifiers
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        match self.lookup(&**source, &keys) {
            Ok(found) => {
                let found: HashMap<String, AppIdentity> = found
                    .into_iter()
                    .filter(|(k, _)| keys.contains(k.trim()))
                    .collect();
                tracing::info!(
                    source = %source.kind(),
                    location = %source.location(),
                    requested = keys.len(),
                    resolved = found.len(),
                    "Resolved app identities"
                );
                Resolution {
                    identities: IdentityMap::new(found),
                    kind: Some(source.kind()),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    source = %source.kind(),
                    location = %source.location(),
                    error = %e,
                    "Lookup backend unavailable; continuing with unknown identities"
                );
                Resolution {
                    identities: IdentityMap::default(),
                    kind: Some(source.kind()),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Resolve AdamID `keys` through `source`, bridging when it is keyed by
    /// bundle id.
    fn lookup(
        &self,
        source: &dyn IdentitySource,
        keys: &BTreeSet<String>,
    ) -> Result<HashMap<String, AppIdentity>> {
        if source.key_space() == LookupKey::AdamId {
            return source.lookup(keys);
        }

        let bridge = self.bridge.as_ref().ok_or_else(|| {
            Error::Lookup(format!(
                "{} lookups are keyed by bundle id; lookup.path must map AdamIDs to bundle ids",
                source.kind()
            ))
        })?;

        let bridged = bridge.lookup(keys)?;
        let bundle_ids: BTreeSet<String> = bridged
            .iter()
            .filter(|(adam_id, _)| keys.contains(adam_id.trim()))
            .map(|(_, identity)| identity.bundle_id.trim().to_string())
            .filter(|bundle_id| !bundle_id.is_empty() && bundle_id != UNKNOWN_BUNDLE_ID)
            .collect();

        tracing::debug!(
            source = %source.kind(),
            bridge = %bridge.location(),
            identifiers = keys.len(),
            bundle_ids = bundle_ids.len(),
            "Translated AdamIDs to bundle ids"
        );

        let named = source.lookup(&bundle_ids)?;

        // The catalog name wins; the bridge's own name covers bundle ids the
        // catalog does not list.
        Ok(bridged
            .into_iter()
            .map(|(adam_id, local)| {
                let identity = match named.get(local.bundle_id.trim()) {
                    Some(remote) => AppIdentity::new(
                        adam_id.trim(),
                        remote.display_name.clone(),
                        local.bundle_id.trim(),
                    ),
                    None => local,
                };
                (adam_id, identity)
            })
            .collect())
    }
}
