//! Mod Index Aggregator
//!
//! Aggregates Kerbal Space Program mod listings from three heterogeneous
//! upstreams — the SpaceDock API (paginated JSON), the Curse portal
//! (paginated HTML) and the CKAN metadata repository (a gzip tarball of JSON
//! files) — normalizes the records and merges them into one queryable Total
//! view keyed by mod name.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aggregator::{
//!     CancellationToken, FetchConfig, Pipeline, ProgressEvent, SourceKind, Store,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> aggregator::Result<()> {
//! let store = Store::connect("data/database.db").await?;
//! let pipeline = Arc::new(Pipeline::new(store, FetchConfig::default())?);
//!
//! let cancel = CancellationToken::new();
//! let progress = Arc::new(|event: ProgressEvent| {
//!     if let (Some(source), Some(percent)) = (event.source(), event.percent()) {
//!         println!("{source}: {percent}%");
//!     }
//! });
//!
//! // Refresh every source concurrently; each pipeline re-merges the Total
//! // view as soon as it commits, so partial availability is visible early.
//! let mut events = pipeline.refresh_all(SourceKind::ALL, cancel, progress);
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Structure
//!
//! - [`sources`]: one cancelable, progress-reporting fetcher and one pure
//!   parser per upstream
//! - [`version`] / [`normalize`]: version-string ordering and display-name
//!   cleanup shared by the parsers
//! - [`merge`]: deterministic recompute of the Total view
//! - [`store`]: SQLite persistence with transactional table replacement
//! - [`pipeline`]: per-source fetch → parse → store → merge orchestration

pub mod cache;
pub mod config;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod sources;
pub mod store;
pub mod version;

// Re-export commonly used types for convenience
pub use config::FetchConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineEvent, PipelineOutcome};
pub use progress::{noop_progress, ProgressCallback, ProgressEvent};
pub use record::{ModRecord, ModTable, SourceKind, TotalRecord};
pub use store::Store;

// The cancellation token handed to fetch jobs, re-exported so binaries don't
// need their own tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
