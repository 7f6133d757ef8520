//! Scripted scanner and store fixtures

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use usenet_indexer::db::{NewBinary, NewPart, NewSegment};
use usenet_indexer::{Database, Error, GroupScanner, Result};

/// One posting a [`ScriptedScanner`] writes into the store
#[derive(Clone, Debug)]
pub struct Posting {
    pub name: String,
    pub poster: String,
    pub posted: DateTime<Utc>,
    /// File names, one part each
    pub files: Vec<String>,
    /// Segments per part
    pub segments: i32,
    /// Bytes per segment
    pub segment_size: i64,
    /// Segments actually stored per part
    pub present: i32,
}

impl Posting {
    /// A complete posting of `files`, one 1000-byte segment each
    pub fn complete(name: &str, files: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            poster: "poster@example.com".to_string(),
            posted: Utc::now(),
            files: files.iter().map(|f| f.to_string()).collect(),
            segments: 1,
            segment_size: 1000,
            present: 1,
        }
    }
}

/// Scanner that ingests a fixed script of postings per group, once
pub struct ScriptedScanner {
    db: Arc<Database>,
    script: Mutex<HashMap<String, Vec<Posting>>>,
    failing: Vec<String>,
}

impl ScriptedScanner {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            script: Mutex::new(HashMap::new()),
            failing: Vec::new(),
        }
    }

    pub fn post(self, group: &str, posting: Posting) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(group.to_string())
            .or_default()
            .push(posting);
        self
    }

    pub fn fail(mut self, group: &str) -> Self {
        self.failing.push(group.to_string());
        self
    }
}

#[async_trait]
impl GroupScanner for ScriptedScanner {
    async fn scan(&self, group: &str) -> Result<u64> {
        if self.failing.iter().any(|g| g == group) {
            return Err(Error::scan(group, "server closed connection"));
        }

        let postings = self.script.lock().unwrap().remove(group).unwrap_or_default();
        let mut stored = 0;
        for posting in &postings {
            stored += ingest(&self.db, group, posting).await?;
        }
        Ok(stored)
    }

    async fn scan_missing(&self, _group: &str) -> Result<u64> {
        Ok(0)
    }
}

/// Write a posting as binary, parts and segments; returns the article count
pub async fn ingest(db: &Database, group: &str, posting: &Posting) -> Result<u64> {
    let binary_id = db
        .insert_binary(&NewBinary {
            name: posting.name.clone(),
            group_name: group.to_string(),
            posted_by: posting.poster.clone(),
            posted: posting.posted,
            total_parts: posting.files.len() as i32,
            regex_id: None,
            xref: Some(format!("news.example.com {group}:1")),
        })
        .await?;

    let total = posting.files.len();
    let mut articles = 0;
    for (i, file) in posting.files.iter().enumerate() {
        let part_id = db
            .insert_part(
                binary_id,
                &NewPart {
                    message_id: format!("<{}.{i}@example>", posting.name),
                    subject: format!("{} [{}/{}] - \"{file}\" yEnc", posting.name, i + 1, total),
                    total_segments: posting.segments,
                    posted: posting.posted,
                },
            )
            .await?;

        let segments: Vec<NewSegment> = (1..=posting.present)
            .map(|n| NewSegment {
                segment: n,
                size: posting.segment_size,
                message_id: format!("<{}.{i}.{n}@example>", posting.name),
            })
            .collect();
        articles += segments.len() as u64;
        db.insert_segments(part_id, &segments).await?;
    }

    Ok(articles)
}

/// Fresh store in a temporary file with the given groups active
pub async fn store(groups: &[&str]) -> (NamedTempFile, Arc<Database>) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Arc::new(Database::new(temp_file.path()).await.unwrap());
    for group in groups {
        db.upsert_group(group, true).await.unwrap();
    }
    (temp_file, db)
}
