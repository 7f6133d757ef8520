//! Post-processing passes over published releases
//!
//! Run after finalization when `postprocess.enabled` is set. Each pass is
//! independent and commits on its own:
//!
//! - delete releases whose archives turned out to be password protected
//! - rename releases in catch-all categories using their secondary evidence
//! - purge releases matching the current blacklist rules
//! - delete releases flagged as unwanted

use crate::blacklist::BlacklistFilter;
use crate::category::{CategoryId, Classifier};
use crate::config::PostProcessConfig;
use crate::db::{Database, Release};
use crate::naming::{NameResolution, NameResolver, ReleaseEvidence, sanitize_release_name};
use crate::types::{days_ago, to_micros};
use crate::Result;
use std::sync::Arc;

/// Outcome of one rename pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameReport {
    /// Releases given a new search name and category
    pub renamed: u64,
    /// Releases whose name was kept but category recomputed
    pub recategorized: u64,
    /// Releases left untouched
    pub unchanged: u64,
    /// Releases skipped because of a store error
    pub errors: u64,
}

/// Totals for [`PostProcessor::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessReport {
    /// Releases deleted as password protected
    pub passworded: u64,
    /// Combined rename results over all configured categories
    pub renames: RenameReport,
    /// Releases deleted by blacklist rules
    pub blacklisted: u64,
    /// Releases deleted as unwanted
    pub unwanted: u64,
}

/// Runs the configured post-processing passes
pub struct PostProcessor {
    db: Arc<Database>,
    config: PostProcessConfig,
    resolver: NameResolver,
}

impl PostProcessor {
    /// Create a post-processor using the default name extractors
    pub fn new(db: Arc<Database>, config: PostProcessConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self::with_resolver(db, config, NameResolver::new(classifier))
    }

    /// Create a post-processor with a custom name resolver
    pub fn with_resolver(db: Arc<Database>, config: PostProcessConfig, resolver: NameResolver) -> Self {
        Self {
            db,
            config,
            resolver,
        }
    }

    /// Run every enabled pass
    pub async fn run(&self) -> Result<PostProcessReport> {
        let mut report = PostProcessReport::default();

        if self.config.delete_passworded {
            report.passworded = self.delete_passworded_releases().await?;
        }

        for &category in &self.config.rename_categories {
            let pass = self.rename_bad_releases(CategoryId(category)).await?;
            report.renames.renamed += pass.renamed;
            report.renames.recategorized += pass.recategorized;
            report.renames.unchanged += pass.unchanged;
            report.renames.errors += pass.errors;
        }

        if self.config.delete_blacklisted_releases {
            report.blacklisted = self.delete_blacklisted_releases().await?;
        }

        if self.config.delete_bad_releases {
            report.unwanted = self.delete_unwanted_releases().await?;
        }

        Ok(report)
    }

    /// Delete password-protected releases
    ///
    /// Possibly protected releases go too when
    /// `delete_potentially_passworded` is set.
    pub async fn delete_passworded_releases(&self) -> Result<u64> {
        let deleted = self
            .db
            .delete_passworded_releases(self.config.delete_potentially_passworded)
            .await?;
        tracing::info!(deleted, "Deleted passworded releases");
        Ok(deleted)
    }

    /// Try to find better names for the releases in `category`
    pub async fn rename_bad_releases(&self, category: CategoryId) -> Result<RenameReport> {
        let mut report = RenameReport::default();

        for release in self.db.releases_in_category(category.get()).await? {
            match self.rename_release(&release).await {
                Ok(NameResolution::Rename { .. }) => report.renamed += 1,
                Ok(NameResolution::Keep { .. }) => report.recategorized += 1,
                Ok(NameResolution::NoCandidate) => report.unchanged += 1,
                Err(e) => {
                    tracing::error!(
                        release_id = release.id.get(),
                        error = %e,
                        "Failed to rename release"
                    );
                    report.errors += 1;
                }
            }
        }

        tracing::info!(
            category = %category,
            renamed = report.renamed,
            recategorized = report.recategorized,
            unchanged = report.unchanged,
            "Rename pass complete"
        );
        Ok(report)
    }

    async fn rename_release(&self, release: &Release) -> Result<NameResolution> {
        let evidence = self.gather_evidence(release).await?;
        let resolution = self.resolver.discover_name(&evidence);

        match &resolution {
            NameResolution::Rename { name, category } => {
                self.db
                    .update_release_name(release.id, &sanitize_release_name(name), category.get())
                    .await?;
            }
            NameResolution::Keep { category } => {
                if category.get() != release.category_id {
                    self.db
                        .update_release_category(release.id, category.get())
                        .await?;
                }
            }
            NameResolution::NoCandidate => {}
        }

        Ok(resolution)
    }

    async fn gather_evidence(&self, release: &Release) -> Result<ReleaseEvidence> {
        let files = self
            .db
            .release_files(release.id)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        let nfo = self
            .db
            .get_nfo(release.id)
            .await?
            .map(|data| String::from_utf8_lossy(&data).into_owned());
        let sfv = self
            .db
            .get_sfv(release.id)
            .await?
            .map(|data| String::from_utf8_lossy(&data).into_owned());

        Ok(ReleaseEvidence {
            release_id: release.id.get(),
            search_name: release.search_name.clone(),
            category: CategoryId(release.category_id),
            files,
            nfo,
            sfv,
        })
    }

    /// Delete published releases that match an enabled blacklist rule
    ///
    /// Matching is case-insensitive. With `delete_blacklisted_days` set only
    /// releases posted within that window are considered.
    pub async fn delete_blacklisted_releases(&self) -> Result<u64> {
        let filter = BlacklistFilter::load_for_releases(&self.db).await?;
        if filter.is_empty() {
            return Ok(0);
        }

        let since = self
            .config
            .delete_blacklisted_days
            .filter(|&days| days > 0)
            // A window reaching past the earliest representable date covers everything
            .and_then(days_ago)
            .map(to_micros);

        let doomed: Vec<_> = self
            .db
            .releases_for_blacklist(since)
            .await?
            .into_iter()
            .filter_map(|release| {
                let rule = filter.matches_release(&release)?;
                tracing::debug!(
                    release_id = release.id.get(),
                    name = %release.name,
                    rule_id = rule.id,
                    "Release matches blacklist"
                );
                Some(release.id)
            })
            .collect();

        let deleted = self.db.delete_releases(&doomed).await?;
        tracing::info!(deleted, "Deleted blacklisted releases");
        Ok(deleted)
    }

    /// Delete releases flagged as unwanted
    pub async fn delete_unwanted_releases(&self) -> Result<u64> {
        let deleted = self.db.delete_unwanted_releases().await?;
        tracing::info!(deleted, "Deleted bad releases");
        Ok(deleted)
    }
}
