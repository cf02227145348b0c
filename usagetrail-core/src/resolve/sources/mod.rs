//! Identity lookup backends
//!
//! | Backend | Module | Keyed by |
//! |---------|--------|----------|
//! | Mapping file | [`file`] | AdamID |
//! | Companion store database | [`store_db`] | AdamID (`store_item_id`) |
//! | Remote catalog | [`catalog`] | Bundle id |

mod catalog;
mod file;
mod store_db;

pub use catalog::{CatalogClient, CatalogSource};
pub use file::{parse_mapping, MappingFileSource};
pub use store_db::StoreDbSource;

use super::IdentitySource;
use crate::config::{Config, LookupKind};
use crate::error::{Error, Result};

/// Create the backend for `kind` from configuration.
pub fn create_source(kind: LookupKind, config: &Config) -> Result<Box<dyn IdentitySource>> {
    match kind {
        LookupKind::File => {
            let path = config.lookup.path.clone().ok_or_else(|| {
                Error::Config("lookup.path is required for file lookups".to_string())
            })?;
            Ok(Box::new(MappingFileSource::new(path)))
        }
        LookupKind::StoreDb => {
            let path = config.lookup.path.clone().ok_or_else(|| {
                Error::Config("lookup.path is required for store_db lookups".to_string())
            })?;
            Ok(Box::new(StoreDbSource::new(
                path,
                config.lookup.store_table.clone(),
            )))
        }
        LookupKind::Catalog => Ok(Box::new(CatalogSource::new(config.catalog.clone())?)),
    }
}

/// Local AdamID backend at `lookup.path`, used to translate identifiers into
/// bundle ids for the catalog.
pub fn create_bridge(config: &Config) -> Option<Box<dyn IdentitySource>> {
    let kind = config.lookup.local_kind()?;
    create_source(kind, config).ok()
}
