//! Merge of per-source tables into the Total view
//!
//! The Total view is derived data: every call recomputes it wholesale from
//! whatever per-source snapshots exist, so it always reflects partial
//! availability while other pipelines are still running. Mods join on their
//! normalized name; when sources disagree on a URL the fixed precedence
//! [`SourceKind::MERGE_PRECEDENCE`] (archive over HTML over API) decides.

use crate::record::{ModTable, SourceKind, TotalRecord, NOT_AVAILABLE};
use std::collections::{BTreeMap, BTreeSet};

/// Rebuild the Total view from all per-source tables.
///
/// The output carries exactly the union of names across the inputs, sorted
/// case-insensitively.
pub fn merge(tables: &BTreeMap<SourceKind, ModTable>) -> Vec<TotalRecord> {
    let mut names: Vec<&str> = tables
        .values()
        .flat_map(|table| table.keys())
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    names.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });

    names
        .into_iter()
        .map(|name| {
            let mut record = TotalRecord::new(name);
            for kind in SourceKind::ALL {
                if let Some(found) = tables.get(&kind).and_then(|table| table.get(name)) {
                    record.presence.insert(kind, true);
                    record
                        .compatibility
                        .insert(kind, found.compatibility_version.clone());
                }
            }
            for kind in SourceKind::MERGE_PRECEDENCE {
                let Some(found) = tables.get(&kind).and_then(|table| table.get(name)) else {
                    continue;
                };
                if record.source_url.is_none() {
                    record.source_url = usable_url(&found.source_url);
                }
                if record.homepage_url.is_none() {
                    record.homepage_url = usable_url(&found.homepage_url);
                }
            }
            record
        })
        .collect()
}

/// Treat empty strings and the "not available" placeholder as absent.
fn usable_url(url: &str) -> Option<String> {
    if url.is_empty() || url == NOT_AVAILABLE {
        None
    } else {
        Some(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ModRecord;

    fn record(name: &str, compatibility: &str, source_url: &str, homepage_url: &str) -> ModRecord {
        ModRecord {
            name: name.to_string(),
            compatibility_version: compatibility.to_string(),
            source_url: source_url.to_string(),
            homepage_url: homepage_url.to_string(),
            extra_urls: BTreeMap::new(),
        }
    }

    fn table(records: &[ModRecord]) -> ModTable {
        records
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect()
    }

    fn three_source_fixture() -> BTreeMap<SourceKind, ModTable> {
        let mut tables = BTreeMap::new();
        tables.insert(
            SourceKind::SpaceDock,
            table(&[
                record("Alpha", "1.2.2", "https://api.example/alpha", "https://api.example/a"),
                record("beta", "1.1.3", NOT_AVAILABLE, "https://api.example/b"),
            ]),
        );
        tables.insert(
            SourceKind::Curse,
            table(&[record("Alpha", "1.2.1", NOT_AVAILABLE, "https://html.example/a")]),
        );
        tables.insert(
            SourceKind::Ckan,
            table(&[record("Alpha", "1.2.2", "https://ckan.example/alpha", "")]),
        );
        tables
    }

    #[test]
    fn total_names_equal_the_union_of_sources() {
        let merged = merge(&three_source_fixture());
        let names: Vec<&str> = merged.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "beta"]);
    }

    #[test]
    fn presence_flags_track_each_source() {
        let merged = merge(&three_source_fixture());
        let alpha = &merged[0];
        assert!(alpha.presence[&SourceKind::SpaceDock]);
        assert!(alpha.presence[&SourceKind::Curse]);
        assert!(alpha.presence[&SourceKind::Ckan]);
        let beta = &merged[1];
        assert!(beta.presence[&SourceKind::SpaceDock]);
        assert!(!beta.presence[&SourceKind::Curse]);
        assert!(!beta.presence[&SourceKind::Ckan]);
    }

    #[test]
    fn url_conflicts_resolve_archive_first() {
        let merged = merge(&three_source_fixture());
        let alpha = &merged[0];
        // CKAN has a source URL, so it wins over SpaceDock's.
        assert_eq!(alpha.source_url.as_deref(), Some("https://ckan.example/alpha"));
        // CKAN's homepage is empty, so Curse (next in precedence) supplies it.
        assert_eq!(alpha.homepage_url.as_deref(), Some("https://html.example/a"));
    }

    #[test]
    fn placeholder_urls_never_surface_in_total() {
        let merged = merge(&three_source_fixture());
        let beta = &merged[1];
        assert_eq!(beta.source_url, None);
        assert_eq!(beta.homepage_url.as_deref(), Some("https://api.example/b"));
    }

    #[test]
    fn merge_is_idempotent() {
        let tables = three_source_fixture();
        assert_eq!(merge(&tables), merge(&tables));
    }

    #[test]
    fn merge_reflects_partial_availability() {
        let mut tables = BTreeMap::new();
        tables.insert(
            SourceKind::Curse,
            table(&[record("Solo", "1.0", NOT_AVAILABLE, NOT_AVAILABLE)]),
        );
        let merged = merge(&tables);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].presence[&SourceKind::Curse]);
        assert!(!merged[0].presence[&SourceKind::SpaceDock]);
        assert_eq!(merged[0].compatibility.get(&SourceKind::Curse).unwrap(), "1.0");
    }

    #[test]
    fn sort_order_is_case_insensitive() {
        let mut tables = BTreeMap::new();
        tables.insert(
            SourceKind::SpaceDock,
            table(&[
                record("zulu", "1.0", NOT_AVAILABLE, NOT_AVAILABLE),
                record("Yankee", "1.0", NOT_AVAILABLE, NOT_AVAILABLE),
                record("alpha", "1.0", NOT_AVAILABLE, NOT_AVAILABLE),
            ]),
        );
        let names: Vec<String> = merge(&tables).into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["alpha", "Yankee", "zulu"]);
    }
}
