//! Scan orchestration loop
//!
//! One cycle of [`ScanOrchestrator`]:
//!
//! ```text
//! active groups? ──none──▶ stop
//!      │
//!      ▼
//! scan every group (bounded, with a deadline)
//!      ▼
//! retry recorded misses (optional, same pool, no deadline)
//!      ▼
//! finalize releases ─▶ post-process (optional)
//!      ▼
//! evict dead binaries ─▶ compact ─▶ sleep
//! ```
//!
//! Scan tasks run on the tokio runtime and report back over a channel. Once
//! the scan deadline passes the orchestrator stops listening: tasks still
//! running are left to finish on their own and their results are dropped.
//! Their groups are scanned again next cycle.

use crate::category::Classifier;
use crate::config::{Config, ScanConfig};
use crate::db::Database;
use crate::nzb::DescriptorWriter;
use crate::pipeline::{FinalizeReport, ReleasePipeline};
use crate::post_process::{PostProcessReport, PostProcessor};
use crate::types::days_ago;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Protocol layer that pulls new articles for a group into the store
///
/// Implementations insert binaries, parts and segments through
/// [`Database`] and record gaps with [`Database::record_miss`].
#[async_trait]
pub trait GroupScanner: Send + Sync {
    /// Fetch new articles for `group`, returning how many were stored
    async fn scan(&self, group: &str) -> Result<u64>;

    /// Re-fetch previously missed articles for `group`
    async fn scan_missing(&self, group: &str) -> Result<u64>;
}

/// Result of one per-group task
#[derive(Debug)]
pub struct ScanOutcome {
    /// Group the task worked on
    pub group: String,
    /// Articles stored, or the failure the task hit
    pub result: Result<u64>,
}

/// Summary of one completed cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Outcomes of scan tasks that reported before the deadline
    pub scans: Vec<ScanOutcome>,
    /// Scan tasks abandoned at the deadline
    pub timed_out: usize,
    /// Outcomes of miss-retry tasks
    pub retries: Vec<ScanOutcome>,
    /// Finalization totals, if the pipeline ran successfully
    pub finalize: Option<FinalizeReport>,
    /// Post-processing totals, if enabled and successful
    pub post_process: Option<PostProcessReport>,
    /// Dead binaries evicted
    pub evicted: u64,
}

/// How a call to [`ScanOrchestrator::run_cycle`] ended
#[derive(Debug)]
pub enum CycleOutcome {
    /// No group is active; the loop should stop
    NoActiveGroups,
    /// Shutdown was requested while scanning
    Interrupted,
    /// The cycle ran to the end
    Completed(CycleReport),
}

#[derive(Clone, Copy, Debug)]
enum ScanKind {
    New,
    Missing,
}

/// Drives scan, finalization and maintenance cycles
pub struct ScanOrchestrator {
    db: Arc<Database>,
    config: ScanConfig,
    scanner: Arc<dyn GroupScanner>,
    pipeline: ReleasePipeline,
    post_processor: Option<PostProcessor>,
    shutdown: CancellationToken,
}

impl ScanOrchestrator {
    /// Create an orchestrator
    ///
    /// `config` should already have passed [`Config::validate`].
    pub fn new(
        db: Arc<Database>,
        config: &Config,
        scanner: Arc<dyn GroupScanner>,
        classifier: Arc<dyn Classifier>,
        writer: Arc<dyn DescriptorWriter>,
    ) -> Self {
        let pipeline = ReleasePipeline::new(
            db.clone(),
            config.postprocess.clone(),
            classifier.clone(),
            writer,
        );
        let post_processor = config.postprocess.enabled.then(|| {
            PostProcessor::new(db.clone(), config.postprocess.clone(), classifier)
        });

        Self {
            db,
            config: config.scan.clone(),
            scanner,
            pipeline,
            post_processor,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run cycles until no group is active or shutdown is requested
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Scan loop started");

        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!("Scan loop shutting down");
                break;
            }

            match self.run_cycle().await? {
                CycleOutcome::NoActiveGroups => {
                    tracing::info!("No active groups, stopping scan loop");
                    break;
                }
                CycleOutcome::Interrupted => {
                    tracing::info!("Scan loop interrupted");
                    break;
                }
                CycleOutcome::Completed(report) => {
                    tracing::debug!(
                        scanned = report.scans.len(),
                        timed_out = report.timed_out,
                        evicted = report.evicted,
                        "Cycle complete, sleeping"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.update_wait) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Scan loop shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run a single cycle
    ///
    /// Only a failure to read the active groups is returned as an error;
    /// every later phase logs its failures and lets the cycle continue.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let groups: Vec<String> = self
            .db
            .active_groups()
            .await?
            .into_iter()
            .map(|g| g.name)
            .collect();

        if groups.is_empty() {
            return Ok(CycleOutcome::NoActiveGroups);
        }

        // More permits than groups would never be used
        let workers = self
            .config
            .update_threads
            .unwrap_or(groups.len())
            .clamp(1, groups.len());
        let pool = Arc::new(Semaphore::new(workers));
        let mut report = CycleReport::default();

        tracing::info!(groups = groups.len(), workers, "Starting scan");
        let total = groups.len();
        let rx = self.spawn_scans(groups, &pool, ScanKind::New);
        // A timeout past the end of the clock means no deadline
        let deadline = tokio::time::Instant::now().checked_add(self.config.scan_timeout);
        let (scans, interrupted) = self.collect(rx, deadline).await;
        report.timed_out = total - scans.len();
        report.scans = scans;

        if report.timed_out > 0 && !interrupted {
            tracing::warn!(
                pending = report.timed_out,
                timeout_secs = self.config.scan_timeout.as_secs(),
                "Scan timeout reached, abandoning pending groups for this cycle"
            );
        }
        if interrupted {
            return Ok(CycleOutcome::Interrupted);
        }

        if self.config.retry_missed {
            match self.db.groups_with_misses().await {
                Ok(missed) if !missed.is_empty() => {
                    tracing::info!(groups = missed.len(), "Retrying missed articles");
                    let rx = self.spawn_scans(missed, &pool, ScanKind::Missing);
                    let (retries, interrupted) = self.collect(rx, None).await;
                    report.retries = retries;
                    if interrupted {
                        return Ok(CycleOutcome::Interrupted);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Failed to list groups with misses"),
            }
        }

        match self.pipeline.finalize().await {
            Ok(finalized) => report.finalize = Some(finalized),
            Err(e) => tracing::error!(error = %e, "Release finalization failed"),
        }

        if let Some(post_processor) = &self.post_processor {
            match post_processor.run().await {
                Ok(processed) => report.post_process = Some(processed),
                Err(e) => tracing::error!(error = %e, "Post-processing failed"),
            }
        }

        if self.config.dead_binary_age_days > 0 {
            match days_ago(self.config.dead_binary_age_days) {
                Some(cutoff) => match self.db.evict_binaries_older_than(cutoff).await {
                    Ok(evicted) => {
                        report.evicted = evicted;
                        tracing::info!(evicted, "Deleted dead binaries");
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to delete dead binaries"),
                },
                // Nothing can be posted before the earliest representable date
                None => tracing::debug!(
                    days = self.config.dead_binary_age_days,
                    "Dead binary cutoff out of range, nothing to evict"
                ),
            }
        }

        if let Err(e) = self.db.compact().await {
            tracing::error!(error = %e, "Failed to compact database");
        }

        Ok(CycleOutcome::Completed(report))
    }

    /// Spawn one task per group, each waiting for a permit from `pool`
    fn spawn_scans(
        &self,
        groups: Vec<String>,
        pool: &Arc<Semaphore>,
        kind: ScanKind,
    ) -> mpsc::UnboundedReceiver<ScanOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();

        for group in groups {
            let tx = tx.clone();
            let pool = pool.clone();
            let scanner = self.scanner.clone();

            tokio::spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };

                // Run the scan in its own task so a panicking scanner becomes
                // an error outcome instead of a silently missing one
                let name = group.clone();
                let handle = tokio::spawn(async move {
                    match kind {
                        ScanKind::New => scanner.scan(&name).await,
                        ScanKind::Missing => scanner.scan_missing(&name).await,
                    }
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::scan(&group, e)),
                };

                // The receiver is gone once the deadline has passed
                let _ = tx.send(ScanOutcome { group, result });
            });
        }

        rx
    }

    /// Gather outcomes until every task reported, the deadline passed or
    /// shutdown was requested. Returns the outcomes and whether shutdown
    /// cut the wait short.
    async fn collect(
        &self,
        mut rx: mpsc::UnboundedReceiver<ScanOutcome>,
        deadline: Option<tokio::time::Instant>,
    ) -> (Vec<ScanOutcome>, bool) {
        let mut outcomes = Vec::new();
        let timeout = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                outcome = rx.recv() => match outcome {
                    Some(outcome) => {
                        log_outcome(&outcome);
                        outcomes.push(outcome);
                    }
                    None => return (outcomes, false),
                },
                _ = &mut timeout => return (outcomes, false),
                _ = self.shutdown.cancelled() => return (outcomes, true),
            }
        }
    }
}

fn log_outcome(outcome: &ScanOutcome) {
    match &outcome.result {
        Ok(articles) => {
            tracing::info!(group = %outcome.group, articles, "Group scan complete");
        }
        Err(e) => {
            tracing::error!(group = %outcome.group, error = %e, "Group scan failed");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryId;
    use crate::config::PostProcessConfig;
    use crate::db::{NewBinary, NewPart, NewSegment};
    use crate::nzb::NzbStore;
    use chrono::Utc;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::NamedTempFile;

    struct FixedClassifier;

    impl Classifier for FixedClassifier {
        fn classify(&self, _name: &str, _group: Option<&str>) -> CategoryId {
            CategoryId::MISC_OTHER
        }
    }

    /// Scanner with per-group behaviour
    #[derive(Default)]
    struct FakeScanner {
        failing: HashSet<String>,
        slow: HashMap<String, Duration>,
        panicking: HashSet<String>,
        /// Binary names to ingest for a group when it is scanned
        ingest: HashMap<String, Vec<String>>,
        db: Option<Arc<Database>>,
        scanned: Mutex<Vec<String>>,
        retried: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl GroupScanner for FakeScanner {
        async fn scan(&self, group: &str) -> Result<u64> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.slow.get(group) {
                tokio::time::sleep(*delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panicking.contains(group) {
                panic!("scanner blew up");
            }
            if self.failing.contains(group) {
                return Err(Error::scan(group, "connection reset"));
            }

            let mut stored = 0;
            if let (Some(db), Some(names)) = (&self.db, self.ingest.get(group)) {
                for name in names {
                    ingest_complete_binary(db, group, name).await;
                    stored += 1;
                }
            }
            self.scanned.lock().unwrap().push(group.to_string());
            Ok(stored)
        }

        async fn scan_missing(&self, group: &str) -> Result<u64> {
            self.retried.lock().unwrap().push(group.to_string());
            Ok(0)
        }
    }

    async fn ingest_complete_binary(db: &Database, group: &str, name: &str) {
        let posted = Utc::now();
        let binary_id = db
            .insert_binary(&NewBinary {
                name: name.to_string(),
                group_name: group.to_string(),
                posted_by: "poster".to_string(),
                posted,
                total_parts: 1,
                regex_id: None,
                xref: None,
            })
            .await
            .unwrap();
        let part_id = db
            .insert_part(
                binary_id,
                &NewPart {
                    message_id: format!("<{name}@x>"),
                    subject: format!("{name} - \"{name}.rar\" yEnc (1/1)"),
                    total_segments: 1,
                    posted,
                },
            )
            .await
            .unwrap();
        db.insert_segments(
            part_id,
            &[NewSegment {
                segment: 1,
                size: 100,
                message_id: format!("<{name}.1@x>"),
            }],
        )
        .await
        .unwrap();
    }

    async fn setup(groups: &[&str]) -> (NamedTempFile, Arc<Database>) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
        for group in groups {
            db.upsert_group(group, true).await.unwrap();
        }
        (temp_file, db)
    }

    fn config(scan: ScanConfig) -> Config {
        Config {
            scan,
            postprocess: PostProcessConfig::default(),
            ..Default::default()
        }
    }

    fn orchestrator(db: &Arc<Database>, config: &Config, scanner: Arc<FakeScanner>) -> ScanOrchestrator {
        ScanOrchestrator::new(
            db.clone(),
            config,
            scanner,
            Arc::new(FixedClassifier),
            Arc::new(NzbStore::new(db.clone())),
        )
    }

    #[tokio::test]
    async fn test_no_active_groups_stops_loop() {
        let (_tmp, db) = setup(&[]).await;
        db.upsert_group("alt.binaries.off", false).await.unwrap();
        let scanner = Arc::new(FakeScanner::default());
        let o = orchestrator(&db, &config(ScanConfig::default()), scanner.clone());

        assert!(matches!(o.run_cycle().await.unwrap(), CycleOutcome::NoActiveGroups));
        // run() returns instead of sleeping
        tokio::time::timeout(Duration::from_secs(5), o.run())
            .await
            .unwrap()
            .unwrap();
        assert!(scanner.scanned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_group_does_not_halt_cycle() {
        let (_tmp, db) = setup(&["alt.binaries.bad", "alt.binaries.good"]).await;
        let scanner = Arc::new(FakeScanner {
            failing: ["alt.binaries.bad".to_string()].into(),
            ingest: [(
                "alt.binaries.good".to_string(),
                vec!["Good.Release-GRP".to_string()],
            )]
            .into(),
            db: Some(db.clone()),
            ..Default::default()
        });
        let o = orchestrator(&db, &config(ScanConfig::default()), scanner.clone());

        let CycleOutcome::Completed(report) = o.run_cycle().await.unwrap() else {
            panic!("cycle should complete");
        };

        assert_eq!(report.scans.len(), 2);
        let failed: Vec<_> = report.scans.iter().filter(|s| s.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].group, "alt.binaries.bad");
        assert_eq!(report.finalize.unwrap().published, 1);
        assert_eq!(db.count_releases().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_panicking_scanner_becomes_error_outcome() {
        let (_tmp, db) = setup(&["alt.binaries.boom"]).await;
        let scanner = Arc::new(FakeScanner {
            panicking: ["alt.binaries.boom".to_string()].into(),
            ..Default::default()
        });
        let o = orchestrator(&db, &config(ScanConfig::default()), scanner);

        let CycleOutcome::Completed(report) = o.run_cycle().await.unwrap() else {
            panic!("cycle should complete");
        };
        assert_eq!(report.scans.len(), 1);
        assert!(matches!(report.scans[0].result, Err(Error::Scan { .. })));
    }

    #[tokio::test]
    async fn test_timed_out_scan_does_not_block_cycle() {
        let (_tmp, db) = setup(&["alt.binaries.fast", "alt.binaries.hung"]).await;
        let scanner = Arc::new(FakeScanner {
            slow: [("alt.binaries.hung".to_string(), Duration::from_secs(3600))].into(),
            ..Default::default()
        });
        let scan = ScanConfig {
            scan_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let o = orchestrator(&db, &config(scan), scanner);

        let started = std::time::Instant::now();
        let CycleOutcome::Completed(report) = o.run_cycle().await.unwrap() else {
            panic!("cycle should complete");
        };

        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.scans.len(), 1);
        assert_eq!(report.scans[0].group, "alt.binaries.fast");
        assert!(report.finalize.is_some());
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let groups = ["alt.binaries.a", "alt.binaries.b", "alt.binaries.c", "alt.binaries.d"];
        let (_tmp, db) = setup(&groups).await;
        let scanner = Arc::new(FakeScanner {
            slow: groups
                .iter()
                .map(|g| (g.to_string(), Duration::from_millis(50)))
                .collect(),
            ..Default::default()
        });
        let scan = ScanConfig {
            update_threads: Some(2),
            ..Default::default()
        };
        let o = orchestrator(&db, &config(scan), scanner.clone());

        o.run_cycle().await.unwrap();
        assert_eq!(scanner.scanned.lock().unwrap().len(), 4);
        assert!(scanner.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_retry_misses_when_enabled() {
        let (_tmp, db) = setup(&["alt.binaries.a"]).await;
        db.record_miss("alt.binaries.a", 1).await.unwrap();
        db.record_miss("alt.binaries.gone", 2).await.unwrap();
        db.record_miss("alt.binaries.gone", 3).await.unwrap();

        let scanner = Arc::new(FakeScanner::default());
        let o = orchestrator(&db, &config(ScanConfig::default()), scanner.clone());
        o.run_cycle().await.unwrap();
        assert!(scanner.retried.lock().unwrap().is_empty());

        let scan = ScanConfig {
            retry_missed: true,
            ..Default::default()
        };
        let o = orchestrator(&db, &config(scan), scanner.clone());
        let CycleOutcome::Completed(report) = o.run_cycle().await.unwrap() else {
            panic!("cycle should complete");
        };

        let mut retried = scanner.retried.lock().unwrap().clone();
        retried.sort();
        assert_eq!(retried, vec!["alt.binaries.a", "alt.binaries.gone"]);
        assert_eq!(report.retries.len(), 2);
    }

    #[tokio::test]
    async fn test_dead_binaries_are_evicted() {
        let (_tmp, db) = setup(&["alt.binaries.a"]).await;
        let stale = db
            .insert_binary(&NewBinary {
                name: "stale".to_string(),
                group_name: "alt.binaries.a".to_string(),
                posted_by: "poster".to_string(),
                posted: Utc::now() - chrono::Duration::days(4),
                total_parts: 5,
                regex_id: None,
                xref: None,
            })
            .await
            .unwrap();

        let scanner = Arc::new(FakeScanner::default());
        let disabled = ScanConfig {
            dead_binary_age_days: 0,
            ..Default::default()
        };
        let o = orchestrator(&db, &config(disabled), scanner.clone());
        o.run_cycle().await.unwrap();
        assert!(db.get_binary(stale).await.unwrap().is_some());

        let o = orchestrator(&db, &config(ScanConfig::default()), scanner);
        let CycleOutcome::Completed(report) = o.run_cycle().await.unwrap() else {
            panic!("cycle should complete");
        };
        assert_eq!(report.evicted, 1);
        assert!(db.get_binary(stale).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extreme_limits_complete_cycle() {
        let (_tmp, db) = setup(&["alt.binaries.a", "alt.binaries.b"]).await;
        db.insert_binary(&NewBinary {
            name: "stale".to_string(),
            group_name: "alt.binaries.a".to_string(),
            posted_by: "poster".to_string(),
            posted: Utc::now() - chrono::Duration::days(400),
            total_parts: 5,
            regex_id: None,
            xref: None,
        })
        .await
        .unwrap();

        let scanner = Arc::new(FakeScanner::default());
        let scan = ScanConfig {
            update_threads: Some(usize::MAX),
            scan_timeout: Duration::from_secs(u64::MAX),
            dead_binary_age_days: u32::MAX,
            ..Default::default()
        };
        let o = orchestrator(&db, &config(scan), scanner.clone());

        // Run on its own task so a panic surfaces as a JoinError
        let report = tokio::spawn(async move { o.run_cycle().await })
            .await
            .expect("cycle must not panic")
            .unwrap();
        let CycleOutcome::Completed(report) = report else {
            panic!("cycle should complete");
        };

        assert_eq!(report.scans.len(), 2);
        assert_eq!(report.timed_out, 0);
        // No cutoff can be that far back, so nothing is evicted
        assert_eq!(report.evicted, 0);
        assert_eq!(db.count_binaries().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let (_tmp, db) = setup(&["alt.binaries.a"]).await;
        let scan = ScanConfig {
            update_wait: Duration::from_secs(3600),
            ..Default::default()
        };
        let o = Arc::new(orchestrator(&db, &config(scan), Arc::new(FakeScanner::default())));
        let token = o.shutdown_token();

        let runner = {
            let o = o.clone();
            tokio::spawn(async move { o.run().await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
