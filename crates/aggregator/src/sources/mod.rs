//! Upstream source implementations
//!
//! Each source lives in its own module and implements [`ModSource`]: a
//! cancelable, progress-reporting fetch that produces a raw payload, and a
//! pure parse that turns the payload into a [`ModTable`]. Fetch and parse are
//! deliberately separated so the parsers can be exercised without a network.

use crate::config::FetchConfig;
use crate::error::{PipelineError, Result};
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::record::{ModTable, SourceKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod ckan;
pub mod curse;
pub mod spacedock;


pub use ckan::CkanSource;
pub use curse::CurseSource;
pub use spacedock::SpaceDockSource;

/// Everything a fetch job needs: the shared client, configuration, the
/// cancellation token it must poll before each new request, and the progress
/// callback.
#[derive(Clone)]
pub struct FetchContext {
    pub client: reqwest::Client,
    pub config: Arc<FetchConfig>,
    pub cancel: CancellationToken,
    pub progress: ProgressCallback,
}

impl FetchContext {
    pub fn new(
        client: reqwest::Client,
        config: Arc<FetchConfig>,
        cancel: CancellationToken,
        progress: ProgressCallback,
    ) -> Self {
        Self { client, config, cancel, progress }
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        (self.progress)(event);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Raw upstream data, before any record extraction.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// JSON bodies, one per API page, in page order.
    ApiPages(Vec<String>),
    /// HTML bodies, one per listing page, in page order.
    HtmlPages(Vec<String>),
    /// The gzip-compressed metadata tarball.
    Archive(Vec<u8>),
}

/// Result of a fetch: either the payload or a clean cancellation.
/// Cancellation is not an error.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(RawPayload),
    Cancelled,
}

/// One upstream source: cancelable fetch plus pure parse.
#[async_trait]
pub trait ModSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Retrieve the raw payload. Implementations poll the cancellation token
    /// before every new request and report coarse progress; a single request
    /// failure aborts the whole fetch.
    async fn fetch(&self, ctx: &FetchContext) -> Result<FetchOutcome>;

    /// Convert the raw payload into records. No I/O, no cancellation
    /// awareness; individual malformed records are skipped, not fatal.
    fn parse(&self, payload: &RawPayload) -> Result<ModTable>;
}

/// Build the source implementation for `kind`.
pub fn source_for(kind: SourceKind, config: &FetchConfig) -> Box<dyn ModSource> {
    match kind {
        SourceKind::SpaceDock => Box::new(SpaceDockSource::new(&config.spacedock_base)),
        SourceKind::Curse => Box::new(CurseSource::new(&config.curse_base)),
        SourceKind::Ckan => Box::new(CkanSource::new()),
    }
}

/// GET a page as text, mapping transport and status failures onto the
/// pipeline error taxonomy.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    debug!("GET {url}");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| PipelineError::Http { url: url.to_string(), source })?;
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::HttpStatus { url: url.to_string(), status });
    }
    response
        .text()
        .await
        .map_err(|source| PipelineError::Http { url: url.to_string(), source })
}
