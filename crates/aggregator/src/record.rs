//! Record types shared across the fetch, merge and store layers
//!
//! Each upstream source parses into the same [`ModRecord`] shape so that the
//! merge can join them by normalized mod name. The CKAN archive additionally
//! keeps one [`CkanRawEntry`] per released mod version before filtering.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Placeholder for fields a source does not supply.
pub const NOT_AVAILABLE: &str = "not available";

/// The three upstream sources, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// SpaceDock REST API, JSON paginated.
    SpaceDock,
    /// Curse mod portal, HTML paginated.
    Curse,
    /// CKAN metadata repository, one gzip tarball.
    Ckan,
}

impl SourceKind {
    /// All sources, iteration order for merges and status reports.
    pub const ALL: [SourceKind; 3] = [SourceKind::SpaceDock, SourceKind::Curse, SourceKind::Ckan];

    /// Conflict precedence when sources disagree on a URL, strongest first.
    pub const MERGE_PRECEDENCE: [SourceKind; 3] =
        [SourceKind::Ckan, SourceKind::Curse, SourceKind::SpaceDock];

    /// Stable lowercase identifier, doubles as the store table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            SourceKind::SpaceDock => "spacedock",
            SourceKind::Curse => "curse",
            SourceKind::Ckan => "ckan",
        }
    }

    /// Human-readable name for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::SpaceDock => "SpaceDock",
            SourceKind::Curse => "Curse",
            SourceKind::Ckan => "CKAN",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spacedock" => Ok(SourceKind::SpaceDock),
            "curse" => Ok(SourceKind::Curse),
            "ckan" => Ok(SourceKind::Ckan),
            other => Err(format!("unknown source '{other}' (expected spacedock, curse or ckan)")),
        }
    }
}

/// One mod as seen by one source.
///
/// The name is normalized (trimmed, leading version tags stripped) before the
/// record is built, so equal mods from different sources compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub name: String,
    /// Game version the mod declares support for, `"not available"` if unknown.
    pub compatibility_version: String,
    /// Source-code repository URL, `"not available"` if the source has none.
    pub source_url: String,
    /// Project or forum page URL.
    pub homepage_url: String,
    /// Additional per-source links (e.g. CKAN resource entries).
    #[serde(default)]
    pub extra_urls: BTreeMap<String, String>,
}

/// A full per-source snapshot, keyed by normalized mod name.
pub type ModTable = BTreeMap<String, ModRecord>;

/// One released version of one mod from the CKAN archive.
///
/// Several entries share an `identifier`; the compatibility filter keeps only
/// those matching the highest compatibility version per identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CkanRawEntry {
    pub identifier: String,
    /// The mod's own release version, possibly epoch-prefixed (`N:version`).
    pub version: String,
    /// Supported game version, `"any"` when the entry declares none.
    pub compatibility_version: String,
    pub name: String,
    pub source_url: String,
    pub homepage_url: String,
    pub extra_urls: BTreeMap<String, String>,
}

/// One row of the merged Total view, derived from the union of all sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalRecord {
    pub name: String,
    /// Whether each source currently lists this mod.
    pub presence: BTreeMap<SourceKind, bool>,
    /// Compatibility version per source that lists the mod.
    pub compatibility: BTreeMap<SourceKind, String>,
    /// Repository URL from the highest-precedence source that has one.
    pub source_url: Option<String>,
    /// Homepage URL from the highest-precedence source that has one.
    pub homepage_url: Option<String>,
}

impl TotalRecord {
    /// An empty row for `name` with all presence flags cleared.
    pub fn new(name: impl Into<String>) -> Self {
        let mut presence = BTreeMap::new();
        for kind in SourceKind::ALL {
            presence.insert(kind, false);
        }
        Self {
            name: name.into(),
            presence,
            compatibility: BTreeMap::new(),
            source_url: None,
            homepage_url: None,
        }
    }

    /// True if at least one source lists this mod.
    pub fn available_anywhere(&self) -> bool {
        self.presence.values().any(|p| *p)
    }
}
