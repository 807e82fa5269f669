//! SpaceDock API source
//!
//! Paginated JSON browse endpoint. The first response's `pages` field tells
//! us how many more requests to issue; a failure on any page aborts the whole
//! fetch (no partial snapshots).

use super::{get_text, FetchContext, FetchOutcome, ModSource, RawPayload};
use crate::error::{PipelineError, Result};
use crate::normalize::normalize;
use crate::progress::ProgressEvent;
use crate::record::{ModRecord, ModTable, SourceKind, NOT_AVAILABLE};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// One API page as returned by `/api/browse`.
#[derive(Debug, Deserialize)]
struct BrowsePage {
    /// Total page count for the current page size.
    pages: u32,
    #[serde(default)]
    result: Vec<BrowseMod>,
}

#[derive(Debug, Deserialize)]
struct BrowseMod {
    name: String,
    id: u64,
    #[serde(default)]
    source_code: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    versions: Vec<BrowseVersion>,
}

/// Release entries come newest first; the first one carries the game version
/// the latest release supports.
#[derive(Debug, Deserialize)]
struct BrowseVersion {
    game_version: String,
}

pub struct SpaceDockSource {
    base: String,
}

impl SpaceDockSource {
    pub fn new(base: &str) -> Self {
        Self { base: base.trim_end_matches('/').to_string() }
    }

    fn record_from(&self, item: BrowseMod) -> Option<ModRecord> {
        let name = normalize(&item.name);
        if name.is_empty() {
            warn!("skipping SpaceDock mod {} with empty name", item.id);
            return None;
        }
        let compatibility_version = item
            .versions
            .first()
            .map(|v| v.game_version.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let source_url = item
            .source_code
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let homepage_url = item
            .website
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| format!("{}/mod/{}", self.base, item.id));
        Some(ModRecord {
            name,
            compatibility_version,
            source_url,
            homepage_url,
            extra_urls: Default::default(),
        })
    }
}

#[async_trait]
impl ModSource for SpaceDockSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SpaceDock
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<FetchOutcome> {
        let kind = self.kind();
        ctx.emit(ProgressEvent::FetchStarted { source: kind });
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }

        let first_url = ctx.config.spacedock_page_url(1);
        let first = get_text(&ctx.client, &first_url).await?;
        // The token may have flipped while the request was in flight.
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }
        ctx.emit(ProgressEvent::FetchProgress { source: kind, percent: 10 });

        // Page count comes from the first response's metadata.
        let meta: BrowsePage = serde_json::from_str(&first)
            .map_err(|source| PipelineError::Decode { source_kind: kind, source })?;
        let pages = meta.pages.max(1);
        debug!("SpaceDock reports {pages} pages");

        let mut bodies = vec![first];
        for page in 2..=pages {
            if ctx.is_cancelled() {
                ctx.emit(ProgressEvent::FetchCancelled { source: kind });
                return Ok(FetchOutcome::Cancelled);
            }
            let url = ctx.config.spacedock_page_url(page);
            bodies.push(get_text(&ctx.client, &url).await?);
            if !ctx.is_cancelled() {
                let percent = ((page * 100) / pages).min(99) as u8;
                ctx.emit(ProgressEvent::FetchProgress { source: kind, percent });
            }
        }

        ctx.emit(ProgressEvent::FetchCompleted { source: kind });
        Ok(FetchOutcome::Fetched(RawPayload::ApiPages(bodies)))
    }

    fn parse(&self, payload: &RawPayload) -> Result<ModTable> {
        let RawPayload::ApiPages(bodies) = payload else {
            return Err(PipelineError::PayloadMismatch { source_kind: self.kind() });
        };
        let mut table = ModTable::new();
        for body in bodies {
            let page: BrowsePage = serde_json::from_str(body)
                .map_err(|source| PipelineError::Decode { source_kind: self.kind(), source })?;
            for item in page.result {
                if let Some(record) = self.record_from(item) {
                    table.insert(record.name.clone(), record);
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(pages: u32, mods: &str) -> String {
        format!(r#"{{"pages": {pages}, "result": [{mods}]}}"#)
    }

    #[test]
    fn each_item_yields_one_record() {
        let source = SpaceDockSource::new("https://spacedock.info");
        let body = page(
            1,
            r#"{"name": "[1.2] Alpha", "id": 7,
                "source_code": "https://github.com/x/alpha",
                "versions": [{"game_version": "1.2.2"}, {"game_version": "1.1.3"}]}"#,
        );
        let table = source
            .parse(&RawPayload::ApiPages(vec![body]))
            .unwrap();
        let record = &table["Alpha"];
        assert_eq!(record.compatibility_version, "1.2.2");
        assert_eq!(record.source_url, "https://github.com/x/alpha");
        assert_eq!(record.homepage_url, "https://spacedock.info/mod/7");
    }

    #[test]
    fn missing_optionals_fall_back_to_documented_defaults() {
        let source = SpaceDockSource::new("https://spacedock.info");
        let body = page(1, r#"{"name": "Bare", "id": 9}"#);
        let table = source.parse(&RawPayload::ApiPages(vec![body])).unwrap();
        let record = &table["Bare"];
        assert_eq!(record.compatibility_version, NOT_AVAILABLE);
        assert_eq!(record.source_url, NOT_AVAILABLE);
        assert_eq!(record.homepage_url, "https://spacedock.info/mod/9");
    }

    #[test]
    fn malformed_page_is_a_decode_error() {
        let source = SpaceDockSource::new("https://spacedock.info");
        let err = source
            .parse(&RawPayload::ApiPages(vec!["not json".to_string()]))
            .unwrap_err();
        assert_eq!(err.category(), "parse");
    }

    #[test]
    fn wrong_payload_kind_is_rejected() {
        let source = SpaceDockSource::new("https://spacedock.info");
        let err = source.parse(&RawPayload::Archive(Vec::new())).unwrap_err();
        assert!(matches!(err, PipelineError::PayloadMismatch { .. }));
    }
}
