//! CKAN metadata archive source
//!
//! One gzip tarball holds the whole repository: one JSON file per released
//! mod version, with `.ckan`/`.kerbalstuff` extensions. Parsing keeps one
//! raw entry per release, filters each mod down to the releases matching its
//! highest compatibility version, then picks the highest remaining release
//! version to represent the mod.

use super::{FetchContext, FetchOutcome, ModSource, RawPayload};
use crate::error::{PipelineError, Result};
use crate::normalize::normalize;
use crate::progress::ProgressEvent;
use crate::record::{CkanRawEntry, ModRecord, ModTable, SourceKind, NOT_AVAILABLE};
use crate::version;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::{debug, warn};

/// Compatibility sentinel for entries that declare no game version.
const ANY_VERSION: &str = "any";

/// Raw JSON shape of one archive entry. Required fields stay optional here so
/// their absence can be reported per entry instead of failing the decode.
#[derive(Debug, Deserialize)]
struct CkanEntryJson {
    identifier: Option<String>,
    version: Option<String>,
    name: Option<String>,
    ksp_version: Option<String>,
    ksp_version_max: Option<String>,
    ksp_version_min: Option<String>,
    #[serde(default)]
    resources: CkanResources,
}

#[derive(Debug, Default, Deserialize)]
struct CkanResources {
    homepage: Option<String>,
    repository: Option<String>,
    kerbalstuff: Option<String>,
    spacedock: Option<String>,
    curse: Option<String>,
}

pub struct CkanSource;

impl CkanSource {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CkanSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModSource for CkanSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Ckan
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<FetchOutcome> {
        let kind = self.kind();
        ctx.emit(ProgressEvent::FetchStarted { source: kind });
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }

        let url = ctx.config.ckan_archive_url.clone();
        let response = ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| PipelineError::Http { url: url.clone(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::HttpStatus { url, status });
        }
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }
        ctx.emit(ProgressEvent::FetchProgress { source: kind, percent: 10 });

        let total = response.content_length();
        let mut payload: Vec<u8> = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|source| PipelineError::Http { url: url.clone(), source })?;
            payload.extend_from_slice(&chunk);
            // Chunk boundaries are the cancellation checkpoints here; the
            // archive is a single request, so aborting means dropping the
            // stream rather than skipping a next request.
            if ctx.is_cancelled() {
                ctx.emit(ProgressEvent::FetchCancelled { source: kind });
                return Ok(FetchOutcome::Cancelled);
            }
            // Without a Content-Length the bar stays at the 10% mark until
            // the download completes.
            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = (10 + payload.len() as u64 * 89 / total).min(99) as u8;
                ctx.emit(ProgressEvent::FetchProgress { source: kind, percent });
            }
        }
        debug!("CKAN archive downloaded, {} bytes", payload.len());

        ctx.emit(ProgressEvent::FetchCompleted { source: kind });
        Ok(FetchOutcome::Fetched(RawPayload::Archive(payload)))
    }

    fn parse(&self, payload: &RawPayload) -> Result<ModTable> {
        let RawPayload::Archive(bytes) = payload else {
            return Err(PipelineError::PayloadMismatch { source_kind: self.kind() });
        };
        let raw_entries = read_archive_entries(bytes)?;
        debug!("CKAN archive yielded {} raw entries", raw_entries.len());

        let mut table = ModTable::new();
        for (identifier, releases) in filter_latest_compat(raw_entries) {
            let versions = releases.iter().map(|entry| entry.version.as_str());
            let Some(best) = version::highest(versions) else { continue };
            let Some(entry) = releases.iter().find(|entry| entry.version == best) else {
                continue;
            };
            debug!("{identifier}: picked version {best} of {}", releases.len());
            let record = ModRecord {
                name: entry.name.clone(),
                compatibility_version: entry.compatibility_version.clone(),
                source_url: entry.source_url.clone(),
                homepage_url: entry.homepage_url.clone(),
                extra_urls: entry.extra_urls.clone(),
            };
            table.insert(record.name.clone(), record);
        }
        Ok(table)
    }
}

/// Walk the tarball and collect every well-formed release entry. Malformed
/// entries are logged and skipped; only a corrupt archive stream is fatal.
fn read_archive_entries(bytes: &[u8]) -> Result<Vec<CkanRawEntry>> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let entries = archive
        .entries()
        .map_err(|source| PipelineError::Archive { context: "opening tarball", source })?;

    let mut raw = Vec::new();
    let mut skipped = 0usize;
    for entry in entries {
        let mut entry =
            entry.map_err(|source| PipelineError::Archive { context: "reading entry", source })?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = match entry.path() {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(err) => {
                warn!("skipping archive entry with unreadable path: {err}");
                skipped += 1;
                continue;
            }
        };
        if !(path.ends_with(".ckan") || path.ends_with(".kerbalstuff")) {
            continue;
        }
        let mut contents = String::new();
        if let Err(err) = entry.read_to_string(&mut contents) {
            warn!("skipping '{path}': {err}");
            skipped += 1;
            continue;
        }
        match parse_entry(&path, &contents) {
            Some(parsed) => raw.push(parsed),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("{skipped} archive entries skipped as malformed");
    }
    Ok(raw)
}

/// Decode one archive file. Returns `None` (with a logged reason) for
/// anything unusable rather than failing the parse.
fn parse_entry(file_name: &str, contents: &str) -> Option<CkanRawEntry> {
    let json: CkanEntryJson = match serde_json::from_str(contents) {
        Ok(json) => json,
        Err(err) => {
            warn!("skipping '{file_name}': invalid JSON ({err})");
            return None;
        }
    };
    let Some(identifier) = json.identifier else {
        warn!("skipping '{file_name}': missing identifier");
        return None;
    };
    let Some(release_version) = json.version else {
        warn!("skipping '{file_name}': missing version");
        return None;
    };
    let Some(raw_name) = json.name else {
        warn!("skipping '{file_name}': missing name");
        return None;
    };
    let name = normalize(&raw_name);
    if name.is_empty() {
        warn!("skipping '{file_name}': name is empty after normalization");
        return None;
    }

    // An explicit ksp_version wins, then the declared maximum; a bare minimum
    // means "this version and up".
    let compatibility_version = json
        .ksp_version
        .or(json.ksp_version_max)
        .or_else(|| json.ksp_version_min.map(|min| format!("{min}+")))
        .unwrap_or_else(|| ANY_VERSION.to_string());

    let mut extra_urls = BTreeMap::new();
    for (key, value) in [
        ("kerbalstuff", json.resources.kerbalstuff),
        ("spacedock", json.resources.spacedock),
        ("curse", json.resources.curse),
    ] {
        if let Some(url) = value.filter(|url| !url.trim().is_empty()) {
            extra_urls.insert(key.to_string(), url);
        }
    }

    Some(CkanRawEntry {
        identifier,
        version: release_version,
        compatibility_version,
        name,
        source_url: json
            .resources
            .repository
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        homepage_url: json
            .resources
            .homepage
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        extra_urls,
    })
}

/// Per mod identifier, keep exactly the releases whose compatibility version
/// equals the maximum observed for that identifier.
///
/// The maximum is a plain string max over game-version strings, not the
/// release-version comparator. Every identifier seen in the input survives:
/// the max is always attained by at least one of its own releases.
pub(crate) fn filter_latest_compat(
    entries: Vec<CkanRawEntry>,
) -> BTreeMap<String, Vec<CkanRawEntry>> {
    let mut grouped: BTreeMap<String, Vec<CkanRawEntry>> = BTreeMap::new();
    for entry in entries {
        grouped.entry(entry.identifier.clone()).or_default().push(entry);
    }
    for releases in grouped.values_mut() {
        let Some(max) = releases
            .iter()
            .map(|entry| entry.compatibility_version.clone())
            .max()
        else {
            continue;
        };
        releases.retain(|entry| entry.compatibility_version == max);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn raw(identifier: &str, version: &str, compatibility: &str) -> CkanRawEntry {
        CkanRawEntry {
            identifier: identifier.to_string(),
            version: version.to_string(),
            compatibility_version: compatibility.to_string(),
            name: identifier.to_string(),
            source_url: NOT_AVAILABLE.to_string(),
            homepage_url: NOT_AVAILABLE.to_string(),
            extra_urls: BTreeMap::new(),
        }
    }

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn filter_keeps_exactly_the_highest_compatibility_releases() {
        let entries = vec![
            raw("X", "0.5", "0.90"),
            raw("X", "1.0", "1.1.3"),
            raw("X", "1.1", "1.2.2"),
            raw("X", "1.2", "1.2.2"),
        ];
        let filtered = filter_latest_compat(entries);
        let versions: Vec<&str> =
            filtered["X"].iter().map(|entry| entry.version.as_str()).collect();
        assert_eq!(versions, ["1.1", "1.2"]);
    }

    #[test]
    fn filter_never_drops_an_identifier() {
        let entries = vec![raw("A", "1.0", "1.2.2"), raw("B", "2.0", "0.90")];
        let filtered = filter_latest_compat(entries);
        assert!(filtered.contains_key("A"));
        assert!(filtered.contains_key("B"));
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let source = CkanSource::new();
        let bytes = archive(&[
            (
                "CKAN-meta/Good/Good-1.0.ckan",
                r#"{"identifier": "Good", "version": "1.0", "name": "Good Mod",
                    "ksp_version": "1.2.2",
                    "resources": {"repository": "https://github.com/x/good"}}"#,
            ),
            (
                "CKAN-meta/Bad/Bad-1.0.ckan",
                r#"{"version": "1.0", "name": "No Identifier"}"#,
            ),
        ]);
        let table = source.parse(&RawPayload::Archive(bytes)).unwrap();
        assert_eq!(table.len(), 1);
        let record = &table["Good Mod"];
        assert_eq!(record.compatibility_version, "1.2.2");
        assert_eq!(record.source_url, "https://github.com/x/good");
    }

    #[test]
    fn non_metadata_files_are_ignored() {
        let source = CkanSource::new();
        let bytes = archive(&[
            ("CKAN-meta/README.md", "# not a mod"),
            (
                "CKAN-meta/Solo/Solo-1.0.kerbalstuff",
                r#"{"identifier": "Solo", "version": "1.0", "name": "Solo"}"#,
            ),
        ]);
        let table = source.parse(&RawPayload::Archive(bytes)).unwrap();
        assert_eq!(table.len(), 1);
        // No game version declared anywhere: the sentinel applies.
        assert_eq!(table["Solo"].compatibility_version, ANY_VERSION);
    }

    #[test]
    fn version_min_gets_an_open_ended_marker() {
        let source = CkanSource::new();
        let bytes = archive(&[(
            "CKAN-meta/Min/Min-1.0.ckan",
            r#"{"identifier": "Min", "version": "1.0", "name": "Min",
                "ksp_version_min": "1.1"}"#,
        )]);
        let table = source.parse(&RawPayload::Archive(bytes)).unwrap();
        assert_eq!(table["Min"].compatibility_version, "1.1+");
    }

    #[test]
    fn highest_release_among_filtered_represents_the_mod() {
        let source = CkanSource::new();
        let entry = |version: &str, ksp: &str| {
            format!(
                r#"{{"identifier": "Multi", "version": "{version}", "name": "Multi",
                     "ksp_version": "{ksp}"}}"#
            )
        };
        let v1 = entry("1:2", "1.2.2");
        let v2 = entry("1:10", "1.2.2");
        let v3 = entry("3.0", "0.90");
        let bytes = archive(&[
            ("CKAN-meta/Multi/a.ckan", v1.as_str()),
            ("CKAN-meta/Multi/b.ckan", v2.as_str()),
            ("CKAN-meta/Multi/c.ckan", v3.as_str()),
        ]);
        let table = source.parse(&RawPayload::Archive(bytes)).unwrap();
        // "3.0" is filtered out (lower compatibility); "1:10" beats "1:2"
        // under natural sort within the epoch group.
        assert_eq!(table.len(), 1);
        assert_eq!(table["Multi"].compatibility_version, "1.2.2");
    }

    #[test]
    fn corrupt_archive_is_a_parse_error() {
        let source = CkanSource::new();
        let err = source
            .parse(&RawPayload::Archive(b"definitely not gzip".to_vec()))
            .unwrap_err();
        assert_eq!(err.category(), "parse");
    }
}
