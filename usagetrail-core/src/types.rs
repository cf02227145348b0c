//! Core domain types for usagetrail
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Identifier** | Opaque numeric App Store key for an app (`ZADAMID`, "AdamID") |
//! | **Bundle ID** | Reverse-DNS package name (`com.example.app`) |
//! | **UsageEvent** | One row of the forensic event table |
//! | **AppIdentity** | Display name and bundle id resolved for an identifier |
//! | **TimelineEntry** | One report row; every event yields a foreground and a background entry |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Display name used when an identifier cannot be resolved.
pub const UNKNOWN_APP: &str = "Unknown App";

/// Bundle id used when an identifier cannot be resolved.
pub const UNKNOWN_BUNDLE_ID: &str = "Unknown Bundle ID";

/// Timestamp layout used in reports (UTC, no suffix).
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

// ============================================
// Cell values
// ============================================

/// A column value as SQLite stored it.
///
/// Core Data columns have loose affinity, so the same column can hold
/// integers in one row and text in another. Values keep their storage class
/// until they are rendered into report text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view of the value; text is parsed after trimming.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(n) => Some(*n as f64),
            CellValue::Real(f) => Some(*f),
            CellValue::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Integer view for numeric storage classes only.
    ///
    /// Reals qualify when they carry no fractional part. Text never does.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CellValue::Integer(n) => Some(*n),
            CellValue::Real(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }
}

impl From<rusqlite::types::Value> for CellValue {
    fn from(value: rusqlite::types::Value) -> Self {
        use rusqlite::types::Value;
        match value {
            Value::Null => CellValue::Null,
            Value::Integer(n) => CellValue::Integer(n),
            Value::Real(f) => CellValue::Real(f),
            Value::Text(s) => CellValue::Text(s),
            Value::Blob(b) => CellValue::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("None"),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Real(x) => f.write_str(&format_number(*x)),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Render a number without a trailing `.0` when it is integral.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// ============================================
// Usage events
// ============================================

/// One row of the forensic app event table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// App Store identifier as trimmed text; the lookup key
    pub identifier: String,
    /// `ZADAMID` exactly as stored, for display
    pub adam_id: CellValue,
    /// Event start, milliseconds since the Unix epoch
    pub time_ms: i64,
    /// `ZFOREGROUNDDURATION` exactly as stored, for display
    pub foreground_duration: CellValue,
    /// Numeric foreground seconds used for the interval, when parseable
    pub foreground_duration_s: Option<f64>,
    /// `ZEVENTSUBTYPE` (3 marks an install)
    pub event_subtype: CellValue,
    /// `ZTYPE`
    pub event_type: CellValue,
    /// `ZAPPVERSION`
    pub app_version: CellValue,
}

impl UsageEvent {
    /// Subtype value recorded for app installs.
    pub const INSTALL_SUBTYPE: i64 = 3;

    pub fn is_install(&self) -> bool {
        self.event_subtype.as_integer() == Some(Self::INSTALL_SUBTYPE)
    }
}

// ============================================
// App identities
// ============================================

/// Display name and bundle id for an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppIdentity {
    pub identifier: String,
    pub display_name: String,
    pub bundle_id: String,
}

impl AppIdentity {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            bundle_id: bundle_id.into(),
        }
    }

    /// Sentinel identity for identifiers no backend could resolve.
    pub fn unknown(identifier: impl Into<String>) -> Self {
        Self::new(identifier, UNKNOWN_APP, UNKNOWN_BUNDLE_ID)
    }

    pub fn is_unknown(&self) -> bool {
        self.display_name == UNKNOWN_APP && self.bundle_id == UNKNOWN_BUNDLE_ID
    }
}

// ============================================
// Timeline
// ============================================

/// Which side of a usage interval an entry marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Foreground,
    Background,
}

impl Phase {
    /// Label written to the `Foreground` report column.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Foreground => "App in Foreground",
            Phase::Background => "App moved to background",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One row of the timeline report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub details: String,
}

impl TimelineEntry {
    /// `MM/DD/YYYY HH:MM:SS` in UTC.
    pub fn timestamp_display(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}
