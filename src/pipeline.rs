//! Binary-to-release finalization
//!
//! [`ReleasePipeline::finalize`] walks every binary the store reports as
//! complete and either publishes it as a release or discards it. Each binary
//! passes through, in order:
//!
//! 1. duplicate check on `(name, posted)`
//! 2. blacklist rules
//! 3. per-group minimum size
//! 4. minimum archive count
//! 5. release building: search name, group, category, NZB descriptor
//!
//! Every terminal decision commits on its own, so a failure on one binary
//! never undoes the work done for earlier ones. A descriptor failure is not
//! terminal: the binary stays in the store and the next run tries again.

use crate::blacklist::BlacklistFilter;
use crate::category::{CategoryId, Classifier};
use crate::config::PostProcessConfig;
use crate::db::{BinaryContents, Category, CompletedBinary, Database, NewRelease};
use crate::naming::sanitize_release_name;
use crate::nzb::DescriptorWriter;
use crate::patterns::ArchiveCounts;
use crate::types::{BinaryId, ReleaseId};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What happened to one completed binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Released and the binary deleted
    Published {
        /// The new release
        release_id: ReleaseId,
    },
    /// A release with the same name and posting time already exists
    Duplicate,
    /// Matched a blacklist rule
    Blacklisted {
        /// The first matching rule
        rule_id: i64,
    },
    /// Smaller than the minimum configured for its group
    Undersized {
        /// Aggregate segment size in bytes
        size: u64,
        /// Configured minimum in bytes
        minimum: u64,
    },
    /// Not enough archive-like parts
    TooFewArchives {
        /// Archive-like parts found
        found: u32,
        /// Configured minimum
        required: u32,
    },
    /// The descriptor could not be written; the binary is kept for a later run
    DescriptorFailed,
}

/// Totals for one [`ReleasePipeline::finalize`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Binaries that passed every gate and reached release building
    pub processed: u64,
    /// Releases created
    pub published: u64,
    /// Binaries discarded as duplicates
    pub duplicates: u64,
    /// Binaries discarded by blacklist rules
    pub blacklisted: u64,
    /// Binaries discarded for being too small
    pub undersized: u64,
    /// Binaries discarded for having too few archives
    pub too_few_archives: u64,
    /// Binaries kept because the descriptor could not be written
    pub descriptor_failures: u64,
    /// Binaries skipped because of an unexpected error
    pub errors: u64,
    /// Wall-clock time of the run
    pub elapsed: Duration,
}

impl FinalizeReport {
    fn record(&mut self, outcome: &FinalizeOutcome) {
        match outcome {
            FinalizeOutcome::Published { .. } => self.published += 1,
            FinalizeOutcome::Duplicate => self.duplicates += 1,
            FinalizeOutcome::Blacklisted { .. } => self.blacklisted += 1,
            FinalizeOutcome::Undersized { .. } => self.undersized += 1,
            FinalizeOutcome::TooFewArchives { .. } => self.too_few_archives += 1,
            FinalizeOutcome::DescriptorFailed => self.descriptor_failures += 1,
        }
    }
}

/// Turns complete binaries into releases
pub struct ReleasePipeline {
    db: Arc<Database>,
    config: PostProcessConfig,
    classifier: Arc<dyn Classifier>,
    writer: Arc<dyn DescriptorWriter>,
}

impl ReleasePipeline {
    /// Create a pipeline
    pub fn new(
        db: Arc<Database>,
        config: PostProcessConfig,
        classifier: Arc<dyn Classifier>,
        writer: Arc<dyn DescriptorWriter>,
    ) -> Self {
        Self {
            db,
            config,
            classifier,
            writer,
        }
    }

    /// Finalize every complete binary currently in the store
    ///
    /// Only a failure to list completed binaries or load blacklist rules is
    /// returned as an error. Failures on individual binaries are logged and
    /// counted in [`FinalizeReport::errors`].
    pub async fn finalize(&self) -> Result<FinalizeReport> {
        let start = Instant::now();
        let mut report = FinalizeReport::default();

        let completed = self
            .db
            .completed_binaries(self.config.min_completion)
            .await?;
        let blacklist = BlacklistFilter::load(&self.db).await?;

        tracing::debug!(
            candidates = completed.len(),
            blacklist_rules = blacklist.len(),
            min_completion = self.config.min_completion,
            "Finalizing completed binaries"
        );

        for candidate in &completed {
            match self
                .finalize_binary(candidate, &blacklist, &mut report)
                .await
            {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    tracing::error!(
                        binary_id = candidate.id.get(),
                        name = %candidate.name,
                        error = %e,
                        "Failed to finalize binary"
                    );
                    report.errors += 1;
                }
            }
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            published = report.published,
            processed = report.processed,
            duplicates = report.duplicates,
            blacklisted = report.blacklisted,
            undersized = report.undersized,
            too_few_archives = report.too_few_archives,
            descriptor_failures = report.descriptor_failures,
            errors = report.errors,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Added {} out of {} binaries",
            report.published,
            report.processed
        );

        Ok(report)
    }

    async fn finalize_binary(
        &self,
        candidate: &CompletedBinary,
        blacklist: &BlacklistFilter,
        report: &mut FinalizeReport,
    ) -> Result<FinalizeOutcome> {
        if self
            .db
            .find_release(&candidate.name, candidate.posted)
            .await?
            .is_some()
        {
            self.discard(candidate.id).await?;
            tracing::info!(
                binary_id = candidate.id.get(),
                name = %candidate.name,
                "Removed binary (duplicate release)"
            );
            return Ok(FinalizeOutcome::Duplicate);
        }

        let contents = self
            .db
            .get_binary_contents(candidate.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("binary {}", candidate.id)))?;
        let binary = &contents.binary;

        if let Some(rule) = blacklist.matches(binary) {
            self.discard(binary.id).await?;
            tracing::info!(
                binary_id = binary.id.get(),
                name = %binary.name,
                rule_id = rule.id,
                "Removed binary (blacklisted)"
            );
            return Ok(FinalizeOutcome::Blacklisted { rule_id: rule.id });
        }

        let size = u64::try_from(contents.size()).unwrap_or(0);
        if let Some(minimum) = self.config.min_size_for(&binary.group_name)
            && size < minimum
        {
            self.discard(binary.id).await?;
            tracing::info!(
                binary_id = binary.id.get(),
                name = %binary.name,
                group = %binary.group_name,
                size,
                minimum,
                "Removed binary (smaller than minimum size for group)"
            );
            return Ok(FinalizeOutcome::Undersized { size, minimum });
        }

        let counts = ArchiveCounts::from_subjects(
            contents.parts.iter().map(|p| p.part.subject.as_str()),
        );
        if counts.archives() < self.config.min_archives {
            self.discard(binary.id).await?;
            tracing::info!(
                binary_id = binary.id.get(),
                name = %binary.name,
                found = counts.archives(),
                required = self.config.min_archives,
                "Removed binary (less than minimum archives)"
            );
            return Ok(FinalizeOutcome::TooFewArchives {
                found: counts.archives(),
                required: self.config.min_archives,
            });
        }

        report.processed += 1;
        self.build_release(&contents, &counts).await
    }

    async fn build_release(
        &self,
        contents: &BinaryContents,
        counts: &ArchiveCounts,
    ) -> Result<FinalizeOutcome> {
        let binary = &contents.binary;
        let search_name = sanitize_release_name(&binary.name);

        let group = self
            .db
            .get_group_by_name(&binary.group_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("group {}", binary.group_name)))?;

        let category_id = self
            .classifier
            .classify(&binary.name, Some(&binary.group_name));
        let category = self.resolve_category(category_id).await?;

        let nzb_id = match self.writer.write(&search_name, &category, contents).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    binary_id = binary.id.get(),
                    search_name = %search_name,
                    error = %e,
                    "Failed to write NZB, keeping binary for a later run"
                );
                return Ok(FinalizeOutcome::DescriptorFailed);
            }
        };

        let release = NewRelease {
            name: binary.name.clone(),
            search_name,
            posted: binary.posted,
            posted_by: binary.posted_by.clone(),
            category_id: category.id,
            group_id: group.id,
            regex_id: binary.regex_id,
            size: contents.size(),
            nzb_id,
        };

        match self.db.publish_release(&release, binary.id).await {
            Ok(release_id) => {
                tracing::debug!(
                    release_id = release_id.get(),
                    search_name = %release.search_name,
                    rars = counts.first_volumes,
                    rar_parts = counts.rar_parts,
                    zips = counts.zips,
                    "Added release"
                );
                tracing::info!(
                    release_id = release_id.get(),
                    search_name = %release.search_name,
                    category = category.id,
                    "Published release"
                );
                Ok(FinalizeOutcome::Published { release_id })
            }
            // Another writer published the same (name, posted) first
            Err(e) if e.is_unique_violation() => {
                self.db.delete_nzb(nzb_id).await?;
                self.discard(binary.id).await?;
                tracing::info!(
                    binary_id = binary.id.get(),
                    name = %binary.name,
                    "Removed binary (duplicate release)"
                );
                Ok(FinalizeOutcome::Duplicate)
            }
            Err(e) => {
                self.db.delete_nzb(nzb_id).await?;
                Err(e)
            }
        }
    }

    /// Look up the classifier's category, falling back to Misc > Other
    async fn resolve_category(&self, id: CategoryId) -> Result<Category> {
        if let Some(category) = self.db.get_category(id.get()).await? {
            return Ok(category);
        }
        tracing::warn!(
            category = %id,
            fallback = %CategoryId::MISC_OTHER,
            "Classifier returned unknown category"
        );
        self.db
            .get_category(CategoryId::MISC_OTHER.get())
            .await?
            .ok_or_else(|| Error::NotFound(format!("category {}", CategoryId::MISC_OTHER)))
    }

    async fn discard(&self, id: BinaryId) -> Result<()> {
        self.db.delete_binary(id).await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinSizeRule;
    use crate::db::{NewBinary, NewBlacklistRule, NewPart, NewSegment};
    use crate::nzb::{NzbStore, decompress_nzb};
    use crate::types::NzbId;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::NamedTempFile;

    const GROUP: &str = "alt.binaries.test";

    struct FixedClassifier(CategoryId);

    impl Classifier for FixedClassifier {
        fn classify(&self, _name: &str, _group: Option<&str>) -> CategoryId {
            self.0
        }
    }

    /// Fails until `healthy` is set, then delegates to a real store
    struct FailingWriter {
        healthy: AtomicBool,
        inner: NzbStore,
    }

    #[async_trait]
    impl DescriptorWriter for FailingWriter {
        async fn write(
            &self,
            search_name: &str,
            category: &Category,
            binary: &BinaryContents,
        ) -> Result<NzbId> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(Error::Descriptor("object store unavailable".into()));
            }
            self.inner.write(search_name, category, binary).await
        }
    }

    async fn setup() -> (NamedTempFile, Arc<Database>) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
        db.upsert_group(GROUP, true).await.unwrap();
        (temp_file, db)
    }

    fn pipeline(db: &Arc<Database>, config: PostProcessConfig, category: i64) -> ReleasePipeline {
        ReleasePipeline::new(
            db.clone(),
            config,
            Arc::new(FixedClassifier(CategoryId(category))),
            Arc::new(NzbStore::new(db.clone())),
        )
    }

    /// Seed a binary whose parts name `file.partNN.<ext>`
    async fn seed(
        db: &Database,
        name: &str,
        posted: chrono::DateTime<Utc>,
        parts: i32,
        segments: i32,
        segment_size: i64,
        ext: &str,
    ) -> BinaryId {
        let binary_id = db
            .insert_binary(&NewBinary {
                name: name.to_string(),
                group_name: GROUP.to_string(),
                posted_by: "poster@example.com".to_string(),
                posted,
                total_parts: parts,
                regex_id: Some(3),
                xref: None,
            })
            .await
            .unwrap();

        for p in 1..=parts {
            let part_id = db
                .insert_part(
                    binary_id,
                    &NewPart {
                        message_id: format!("<{name}.{p}@x>"),
                        subject: format!("{name} [{p}/{parts}] - \"file.part{p:02}.{ext}\" yEnc"),
                        total_segments: segments,
                        posted,
                    },
                )
                .await
                .unwrap();
            let segs: Vec<NewSegment> = (1..=segments)
                .map(|s| NewSegment {
                    segment: s,
                    size: segment_size,
                    message_id: format!("<{name}.{p}.{s}@x>"),
                })
                .collect();
            db.insert_segments(part_id, &segs).await.unwrap();
        }
        binary_id
    }

    #[tokio::test]
    async fn test_complete_binary_is_published() {
        let (_tmp, db) = setup().await;
        let id = seed(&db, "Some.Release-GRP", Utc::now(), 10, 100, 1000, "rar").await;

        let report = pipeline(&db, PostProcessConfig::default(), 5040)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 0);
        assert!(db.get_binary(id).await.unwrap().is_none());

        let releases = db.releases_in_category(5040).await.unwrap();
        assert_eq!(releases.len(), 1);
        let release = &releases[0];
        assert_eq!(release.name, "Some.Release-GRP");
        assert_eq!(release.search_name, "Some Release GRP");
        assert_eq!(release.size, 10 * 100 * 1000);
        assert_eq!(release.regex_id, Some(3));
        assert_eq!(release.grabs, 0);

        let nzb = db.get_nzb(release.nzb_id.unwrap()).await.unwrap().unwrap();
        let xml = decompress_nzb(&nzb.data).unwrap();
        assert!(xml.contains("<meta type=\"name\">Some Release GRP</meta>"));
        assert!(xml.contains("<meta type=\"category\">HD</meta>"));
    }

    #[tokio::test]
    async fn test_incomplete_binary_is_left_alone() {
        let (_tmp, db) = setup().await;
        let id = seed(&db, "Partial", Utc::now(), 2, 10, 100, "rar").await;
        // A third declared part never arrived
        sqlx::query("UPDATE binaries SET total_parts = 3 WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();

        let report = pipeline(&db, PostProcessConfig::default(), 8010)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report, FinalizeReport { elapsed: report.elapsed, ..Default::default() });
        assert!(db.get_binary(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_undersized_binary_is_deleted() {
        let (_tmp, db) = setup().await;
        // 100 MB against a 500 MB minimum
        let id = seed(&db, "Small.Release", Utc::now(), 1, 1, 100_000_000, "rar").await;

        let config = PostProcessConfig {
            min_size: vec![MinSizeRule {
                bytes: 500_000_000,
                groups: vec![GROUP.to_string()],
            }],
            ..Default::default()
        };
        let report = pipeline(&db, config, 8010).finalize().await.unwrap();

        assert_eq!(report.undersized, 1);
        assert_eq!(report.processed, 0);
        assert_eq!(report.published, 0);
        assert!(db.get_binary(id).await.unwrap().is_none());
        assert_eq!(db.count_releases().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_size_rule_for_other_groups_does_not_apply() {
        let (_tmp, db) = setup().await;
        seed(&db, "Small.Release", Utc::now(), 1, 1, 10, "rar").await;

        let config = PostProcessConfig {
            min_size: vec![MinSizeRule {
                bytes: 500_000_000,
                groups: vec!["alt.binaries.other".to_string()],
            }],
            ..Default::default()
        };
        let report = pipeline(&db, config, 8010).finalize().await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_run_is_published_once() {
        let (_tmp, db) = setup().await;
        let posted = Utc::now();
        let first = seed(&db, "Twice.Posted-GRP", posted, 2, 3, 10, "rar").await;
        let second = seed(&db, "Twice.Posted-GRP", posted, 2, 3, 10, "rar").await;

        let report = pipeline(&db, PostProcessConfig::default(), 8010)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(db.count_releases().await.unwrap(), 1);
        assert_eq!(db.count_binaries().await.unwrap(), 0);
        assert!(db.get_binary(first).await.unwrap().is_none());
        assert!(db.get_binary(second).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_binary_is_deleted() {
        let (_tmp, db) = setup().await;
        let posted = Utc::now();
        seed(&db, "Dupe.Release", posted, 1, 1, 10, "rar").await;
        let p = pipeline(&db, PostProcessConfig::default(), 8010);
        assert_eq!(p.finalize().await.unwrap().published, 1);

        let again = seed(&db, "Dupe.Release", posted, 1, 1, 10, "rar").await;
        let report = p.finalize().await.unwrap();

        assert_eq!(report.duplicates, 1);
        assert_eq!(report.processed, 0);
        assert!(db.get_binary(again).await.unwrap().is_none());
        assert_eq!(db.count_releases().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blacklist_short_circuits_on_first_rule() {
        let (_tmp, db) = setup().await;
        let rule = |regex: &str| NewBlacklistRule {
            group_name: GROUP.to_string(),
            field: "subject".to_string(),
            regex: regex.to_string(),
            status: true,
            description: None,
        };
        db.insert_blacklist_rule(&rule("^nomatch$")).await.unwrap();
        let r2 = db.insert_blacklist_rule(&rule("Spam")).await.unwrap();
        db.insert_blacklist_rule(&rule("Release")).await.unwrap();

        let id = seed(&db, "Spam.Release", Utc::now(), 1, 1, 10, "rar").await;
        let report = pipeline(&db, PostProcessConfig::default(), 8010)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.blacklisted, 1);
        assert_eq!(report.processed, 0);
        assert!(db.get_binary(id).await.unwrap().is_none());

        let filter = BlacklistFilter::load(&db).await.unwrap();
        let candidate = crate::db::Binary {
            id,
            name: "Spam.Release".to_string(),
            group_name: GROUP.to_string(),
            posted_by: "p".to_string(),
            posted: 0,
            total_parts: 1,
            regex_id: None,
            xref: None,
            created_at: 0,
        };
        assert_eq!(filter.matches(&candidate).map(|r| r.id), Some(r2));
    }

    #[tokio::test]
    async fn test_too_few_archives() {
        let (_tmp, db) = setup().await;
        let id = seed(&db, "Loose.Files", Utc::now(), 2, 1, 10, "mkv").await;

        let report = pipeline(&db, PostProcessConfig::default(), 8010)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.too_few_archives, 1);
        assert!(db.get_binary(id).await.unwrap().is_none());

        // Disabling the gate lets the same shape through
        let id = seed(&db, "Loose.Files", Utc::now(), 2, 1, 10, "mkv").await;
        let config = PostProcessConfig {
            min_archives: 0,
            ..Default::default()
        };
        let report = pipeline(&db, config, 8010).finalize().await.unwrap();
        assert_eq!(report.published, 1);
        assert!(db.get_binary(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_descriptor_failure_keeps_binary_until_next_run() {
        let (_tmp, db) = setup().await;
        let id = seed(&db, "Retry.Me", Utc::now(), 1, 2, 10, "rar").await;

        let writer = Arc::new(FailingWriter {
            healthy: AtomicBool::new(false),
            inner: NzbStore::new(db.clone()),
        });
        let p = ReleasePipeline::new(
            db.clone(),
            PostProcessConfig::default(),
            Arc::new(FixedClassifier(CategoryId::MISC_OTHER)),
            writer.clone(),
        );

        let report = p.finalize().await.unwrap();
        assert_eq!(report.descriptor_failures, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.published, 0);
        assert!(db.get_binary(id).await.unwrap().is_some());
        assert_eq!(db.count_releases().await.unwrap(), 0);

        writer.healthy.store(true, Ordering::SeqCst);
        let report = p.finalize().await.unwrap();
        assert_eq!(report.published, 1);
        assert!(db.get_binary(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back_to_misc_other() {
        let (_tmp, db) = setup().await;
        seed(&db, "Odd.Category", Utc::now(), 1, 1, 10, "rar").await;

        let report = pipeline(&db, PostProcessConfig::default(), 4242)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.published, 1);
        assert_eq!(db.releases_in_category(8010).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_group_counts_as_error_and_keeps_binary() {
        let (_tmp, db) = setup().await;
        let id = seed(&db, "Orphan.Release", Utc::now(), 1, 1, 10, "rar").await;
        sqlx::query("UPDATE binaries SET group_name = 'alt.binaries.unknown' WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await
            .unwrap();
        let ok = seed(&db, "Fine.Release", Utc::now(), 1, 1, 10, "rar").await;

        let report = pipeline(&db, PostProcessConfig::default(), 8010)
            .finalize()
            .await
            .unwrap();

        assert_eq!(report.errors, 1);
        assert_eq!(report.published, 1);
        assert!(db.get_binary(id).await.unwrap().is_some());
        assert!(db.get_binary(ok).await.unwrap().is_none());
    }
}
