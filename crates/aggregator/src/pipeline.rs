//! Per-source refresh pipelines and their orchestration
//!
//! One pipeline per source: fetch → parse → snapshot → replace the source
//! table → re-merge the Total view, strictly in that order. Pipelines never
//! share in-memory state; the store is the only common component, and every
//! merge recomputes Total from the latest committed per-source snapshots, so
//! concurrent refreshes converge once all in-flight pipelines finish.

use crate::cache;
use crate::config::FetchConfig;
use crate::error::{PipelineError, Result};
use crate::merge::merge;
use crate::progress::{ProgressCallback, ProgressEvent};
use crate::record::{ModTable, SourceKind};
use crate::sources::{source_for, FetchContext, FetchOutcome};
use crate::store::Store;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a single pipeline run ended. Cancellation is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The source table was replaced and the Total view rebuilt.
    Completed { records: usize, total: usize },
    /// Stopped on request; previously persisted data is untouched.
    Cancelled,
}

/// Completion notifications streamed to whoever drives [`Pipeline::refresh_all`].
#[derive(Debug)]
pub enum PipelineEvent {
    Started { source: SourceKind },
    Finished { source: SourceKind, records: usize },
    Cancelled { source: SourceKind },
    Failed { source: SourceKind, error: PipelineError },
}

/// Owns the shared client, configuration and store handle for all pipelines.
pub struct Pipeline {
    store: Store,
    config: Arc<FetchConfig>,
    client: reqwest::Client,
}

impl Pipeline {
    pub fn new(store: Store, config: FetchConfig) -> Result<Self> {
        let client = config.client()?;
        Ok(Self { store, config: Arc::new(config), client })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Run one source's full refresh.
    ///
    /// On cancellation the source's previous table (if any) stays as it was
    /// and the progress indicator has been reset by the fetcher.
    pub async fn refresh(
        &self,
        kind: SourceKind,
        cancel: CancellationToken,
        progress: ProgressCallback,
    ) -> Result<PipelineOutcome> {
        info!("starting {kind} refresh");
        let source = source_for(kind, &self.config);
        let ctx =
            FetchContext::new(self.client.clone(), self.config.clone(), cancel, progress.clone());
        let payload = match source.fetch(&ctx).await? {
            FetchOutcome::Fetched(payload) => payload,
            FetchOutcome::Cancelled => {
                info!("{kind} refresh cancelled");
                return Ok(PipelineOutcome::Cancelled);
            }
        };
        let records = source.parse(&payload)?;
        cache::write_snapshot(&self.config.data_dir, kind, &records)?;
        self.commit(kind, records, &progress).await
    }

    /// Refresh from the snapshot a previous run wrote, skipping the network.
    pub async fn refresh_offline(
        &self,
        kind: SourceKind,
        progress: ProgressCallback,
    ) -> Result<PipelineOutcome> {
        info!("starting offline {kind} refresh");
        let records = cache::read_snapshot(&self.config.data_dir, kind)?;
        self.commit(kind, records, &progress).await
    }

    /// Persist one source's snapshot, then rebuild Total from all committed
    /// per-source tables. Runs after every individual refresh so Total
    /// reflects partial availability.
    async fn commit(
        &self,
        kind: SourceKind,
        records: ModTable,
        progress: &ProgressCallback,
    ) -> Result<PipelineOutcome> {
        let count = records.len();
        self.store.replace_table(kind, &records).await?;
        (progress)(ProgressEvent::RecordsStored { source: kind, count });

        let tables = self.store.read_all().await?;
        let total = merge(&tables);
        self.store.rebuild_total(&total).await?;
        (progress)(ProgressEvent::TotalRebuilt { count: total.len() });
        info!("{kind} refresh complete: {count} records, {} total", total.len());

        Ok(PipelineOutcome::Completed { records: count, total: total.len() })
    }

    /// Spawn one independent refresh task per requested source.
    ///
    /// Tasks share nothing but the store; a failure in one does not disturb
    /// the others. Events arrive on the returned channel as each pipeline
    /// progresses through its lifecycle.
    pub fn refresh_all(
        self: Arc<Self>,
        kinds: impl IntoIterator<Item = SourceKind>,
        cancel: CancellationToken,
        progress: ProgressCallback,
    ) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            let pipeline = Arc::clone(&self);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                let _ = tx.send(PipelineEvent::Started { source: kind });
                let event = match pipeline.refresh(kind, cancel, progress).await {
                    Ok(PipelineOutcome::Completed { records, .. }) => {
                        PipelineEvent::Finished { source: kind, records }
                    }
                    Ok(PipelineOutcome::Cancelled) => PipelineEvent::Cancelled { source: kind },
                    Err(error) => {
                        warn!("{kind} refresh failed: {error}");
                        PipelineEvent::Failed { source: kind, error }
                    }
                };
                let _ = tx.send(event);
            });
        }
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ModRecord, NOT_AVAILABLE};
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn capture() -> (ProgressCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |event| {
            sink.lock().unwrap().push(event);
        });
        (callback, events)
    }

    fn prior_table() -> ModTable {
        let record = ModRecord {
            name: "Prior".to_string(),
            compatibility_version: "1.0".to_string(),
            source_url: NOT_AVAILABLE.to_string(),
            homepage_url: NOT_AVAILABLE.to_string(),
            extra_urls: BTreeMap::new(),
        };
        BTreeMap::from([(record.name.clone(), record)])
    }

    async fn pipeline_for(server: &MockServer, data_dir: &std::path::Path) -> Pipeline {
        let config = FetchConfig {
            spacedock_base: server.uri(),
            curse_base: server.uri(),
            ckan_archive_url: format!("{}/archive/master.tar.gz", server.uri()),
            ..FetchConfig::default()
        }
        .with_data_dir(data_dir);
        let store = Store::connect_in_memory().await.unwrap();
        Pipeline::new(store, config).unwrap()
    }

    #[tokio::test]
    async fn cancellation_leaves_prior_data_and_resets_progress() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let prior = prior_table();
        pipeline.store().replace_table(SourceKind::SpaceDock, &prior).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let (progress, events) = capture();
        let outcome = pipeline
            .refresh(SourceKind::SpaceDock, token, progress)
            .await
            .unwrap();

        assert_eq!(outcome, PipelineOutcome::Cancelled);
        assert_eq!(
            pipeline.store().read_table(SourceKind::SpaceDock).await.unwrap(),
            prior
        );
        let last_percent = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(ProgressEvent::percent)
            .last();
        assert_eq!(last_percent, Some(0));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_refresh_rebuilds_total_from_partial_availability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/browse"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"pages": 1, "result": [{"name": "Fresh", "id": 1,
                     "versions": [{"game_version": "1.2.2"}]}]}"#,
            ))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let outcome = pipeline
            .refresh(SourceKind::SpaceDock, CancellationToken::new(), crate::progress::noop_progress())
            .await
            .unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed { records: 1, total: 1 });

        let total = pipeline.store().query_total(None).await.unwrap();
        assert_eq!(total.len(), 1);
        assert_eq!(total[0].name, "Fresh");
        assert!(total[0].presence[&SourceKind::SpaceDock]);
        assert!(!total[0].presence[&SourceKind::Ckan]);

        // The snapshot written by the refresh supports an offline rerun.
        let offline = pipeline
            .refresh_offline(SourceKind::SpaceDock, crate::progress::noop_progress())
            .await
            .unwrap();
        assert_eq!(offline, PipelineOutcome::Completed { records: 1, total: 1 });
    }

    #[tokio::test]
    async fn a_failed_pipeline_leaves_persisted_state_intact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/browse"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, dir.path()).await;

        let prior = prior_table();
        pipeline.store().replace_table(SourceKind::SpaceDock, &prior).await.unwrap();

        let err = pipeline
            .refresh(
                SourceKind::SpaceDock,
                CancellationToken::new(),
                crate::progress::noop_progress(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), "fetch");
        assert_eq!(
            pipeline.store().read_table(SourceKind::SpaceDock).await.unwrap(),
            prior
        );
    }

    #[tokio::test]
    async fn refresh_all_reports_per_source_events_independently() {
        let server = MockServer::start().await;
        // SpaceDock succeeds...
        Mock::given(method("GET"))
            .and(path("/api/browse"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"pages": 1, "result": [{"name": "Solo", "id": 1,
                     "versions": [{"game_version": "1.2.2"}]}]}"#,
            ))
            .mount(&server)
            .await;
        // ...while the Curse listing is down.
        Mock::given(method("GET"))
            .and(path("/ksp-mods/kerbal"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Arc::new(pipeline_for(&server, dir.path()).await);

        let mut rx = Arc::clone(&pipeline).refresh_all(
            [SourceKind::SpaceDock, SourceKind::Curse],
            CancellationToken::new(),
            crate::progress::noop_progress(),
        );

        let mut finished = None;
        let mut failed = None;
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Finished { source, records } => finished = Some((source, records)),
                PipelineEvent::Failed { source, .. } => failed = Some(source),
                _ => {}
            }
            if finished.is_some() && failed.is_some() {
                break;
            }
        }
        assert_eq!(finished, Some((SourceKind::SpaceDock, 1)));
        assert_eq!(failed, Some(SourceKind::Curse));
        // The failing Curse pipeline did not disturb SpaceDock's commit.
        assert_eq!(pipeline.store().count(SourceKind::SpaceDock).await.unwrap(), 1);
    }
}
