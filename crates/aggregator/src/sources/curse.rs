//! Curse portal source
//!
//! The portal has no API; listings are scraped. Page count is discovered by
//! scanning the first page's pagination links for the highest page number
//! referenced. Each project block contributes one record; blocks missing a
//! name or a "Supports X" fragment are skipped, never fatal.

use super::{get_text, FetchContext, FetchOutcome, ModSource, RawPayload};
use crate::error::{PipelineError, Result};
use crate::normalize::normalize;
use crate::progress::ProgressEvent;
use crate::record::{ModRecord, ModTable, SourceKind, NOT_AVAILABLE};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

static PROJECT_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li.project-item").unwrap());
static NAME_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("h4 a").unwrap());
static PROJECT_META: Lazy<Selector> = Lazy::new(|| Selector::parse("p.project-meta").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

static PAGE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());
static SUPPORTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Supports\s+([\w.+-]+)").unwrap());

pub struct CurseSource {
    base: String,
}

impl CurseSource {
    pub fn new(base: &str) -> Self {
        Self { base: base.trim_end_matches('/').to_string() }
    }

    /// Resolve a possibly relative block link against the portal base.
    fn resolve_href(&self, href: &str) -> Option<String> {
        Url::parse(&self.base).ok()?.join(href).ok().map(Into::into)
    }
}

/// Highest page number referenced by any pagination link on the page.
pub(crate) fn find_max_page(html: &str) -> Option<u32> {
    let document = Html::parse_document(html);
    let mut max_page = None;
    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else { continue };
        for caps in PAGE_PARAM.captures_iter(href) {
            if let Ok(page) = caps[1].parse::<u32>() {
                max_page = Some(max_page.map_or(page, |current: u32| current.max(page)));
            }
        }
    }
    max_page
}

#[async_trait]
impl ModSource for CurseSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Curse
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<FetchOutcome> {
        let kind = self.kind();
        ctx.emit(ProgressEvent::FetchStarted { source: kind });
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }

        let first_url = ctx.config.curse_page_url(1);
        let first = get_text(&ctx.client, &first_url).await?;
        if ctx.is_cancelled() {
            ctx.emit(ProgressEvent::FetchCancelled { source: kind });
            return Ok(FetchOutcome::Cancelled);
        }
        ctx.emit(ProgressEvent::FetchProgress { source: kind, percent: 10 });

        let pages = find_max_page(&first)
            .ok_or_else(|| PipelineError::NoPagesFound { url: first_url.clone() })?;
        debug!("Curse listing spans {pages} pages");

        let mut bodies = vec![first];
        for page in 2..=pages {
            if ctx.is_cancelled() {
                ctx.emit(ProgressEvent::FetchCancelled { source: kind });
                return Ok(FetchOutcome::Cancelled);
            }
            let url = ctx.config.curse_page_url(page);
            bodies.push(get_text(&ctx.client, &url).await?);
            if !ctx.is_cancelled() {
                let percent = ((page * 100) / pages).min(99) as u8;
                ctx.emit(ProgressEvent::FetchProgress { source: kind, percent });
            }
        }

        ctx.emit(ProgressEvent::FetchCompleted { source: kind });
        Ok(FetchOutcome::Fetched(RawPayload::HtmlPages(bodies)))
    }

    fn parse(&self, payload: &RawPayload) -> Result<ModTable> {
        let RawPayload::HtmlPages(bodies) = payload else {
            return Err(PipelineError::PayloadMismatch { source_kind: self.kind() });
        };
        let mut table = ModTable::new();
        for body in bodies {
            let document = Html::parse_document(body);
            for block in document.select(&PROJECT_BLOCK) {
                let Some(link) = block.select(&NAME_LINK).next() else {
                    warn!("skipping Curse block without a name link");
                    continue;
                };
                let name = normalize(&link.text().collect::<String>());
                if name.is_empty() {
                    warn!("skipping Curse block with empty name");
                    continue;
                }
                let meta_text = block
                    .select(&PROJECT_META)
                    .next()
                    .map(|meta| meta.text().collect::<String>())
                    .unwrap_or_default();
                let Some(supports) = SUPPORTS.captures(&meta_text) else {
                    warn!("skipping Curse mod '{name}': no supported-version fragment");
                    continue;
                };
                let homepage_url = link
                    .value()
                    .attr("href")
                    .and_then(|href| self.resolve_href(href))
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string());
                let record = ModRecord {
                    name: name.clone(),
                    compatibility_version: supports[1].to_string(),
                    source_url: NOT_AVAILABLE.to_string(),
                    homepage_url,
                    extra_urls: Default::default(),
                };
                table.insert(name, record);
            }
        }
        Ok(table)
    }
}
