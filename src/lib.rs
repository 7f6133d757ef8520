//! # usenet-indexer
//!
//! Release finalization and scan orchestration for Usenet indexers.
//!
//! A protocol layer (anything implementing [`GroupScanner`]) fills the store
//! with binaries, parts and segments. This crate turns complete binaries into
//! searchable releases, keeps the release table clean and drives the whole
//! thing as a periodic loop.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pluggable collaborators** - Scanning, classification and descriptor
//!   storage are traits with working defaults where one makes sense
//! - **Failure isolation** - A failing group, binary or release is logged
//!   and skipped; the cycle keeps going
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use usenet_indexer::{
//!     Config, Database, GroupScanner, NzbStore, PatternClassifier, Result, ScanOrchestrator,
//!     run_with_shutdown,
//! };
//!
//! struct MyScanner;
//!
//! #[async_trait::async_trait]
//! impl GroupScanner for MyScanner {
//!     async fn scan(&self, _group: &str) -> Result<u64> {
//!         Ok(0)
//!     }
//!     async fn scan_missing(&self, _group: &str) -> Result<u64> {
//!         Ok(0)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file(Path::new("indexer.toml"))?;
//!     config.validate()?;
//!
//!     let db = Arc::new(Database::new(&config.database_path).await?);
//!     db.upsert_group("alt.binaries.example", true).await?;
//!
//!     let orchestrator = ScanOrchestrator::new(
//!         db.clone(),
//!         &config,
//!         Arc::new(MyScanner),
//!         Arc::new(PatternClassifier::new(&config.categories)),
//!         Arc::new(NzbStore::new(db)),
//!     );
//!
//!     run_with_shutdown(orchestrator).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Blacklist rules applied to binaries and releases
pub mod blacklist;
/// Category identifiers and classification
pub mod category;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Release name cleanup and correction
pub mod naming;
/// NZB descriptor rendering and storage
pub mod nzb;
/// Periodic scan loop
pub mod orchestrator;
/// Subject and file name patterns
pub mod patterns;
/// Binary-to-release finalization
pub mod pipeline;
/// Release cleanup passes
pub mod post_process;
/// Core identifier types
pub mod types;

// Re-export commonly used types
pub use blacklist::{BlacklistField, BlacklistFilter, BlacklistRule};
pub use category::{CategoryId, Classifier, PatternClassifier};
pub use config::{CategoryConfig, Config, PostProcessConfig, ScanConfig};
pub use db::Database;
pub use error::{DatabaseError, Error, Result};
pub use naming::{NameResolution, NameResolver, ReleaseEvidence, sanitize_release_name};
pub use nzb::{DescriptorWriter, NzbStore, decompress_nzb};
pub use orchestrator::{CycleOutcome, CycleReport, GroupScanner, ScanOrchestrator, ScanOutcome};
pub use pipeline::{FinalizeOutcome, FinalizeReport, ReleasePipeline};
pub use post_process::{PostProcessReport, PostProcessor, RenameReport};
pub use types::{BinaryId, GroupId, NzbId, Passworded, ReleaseId};

/// Run the scan loop until a termination signal arrives.
///
/// On a signal the orchestrator's shutdown token is cancelled and the current
/// cycle is allowed to wind down before this returns. The loop also returns
/// on its own once no group is active.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(orchestrator: ScanOrchestrator) -> Result<()> {
    let shutdown = orchestrator.shutdown_token();
    let run = orchestrator.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => return result,
        _ = wait_for_signal() => shutdown.cancel(),
    }

    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
