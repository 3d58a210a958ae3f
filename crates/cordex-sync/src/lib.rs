//! Catalog refresh pipeline: download, extract, clean, replace, reindex.
//!
//! One long-running, non-reentrant job. The replace phase is destructive and
//! not transactional: a failure between the drop and the last insert batch
//! leaves the catalog empty until the next successful run. Operators
//! re-trigger manually; there is no automatic retry.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cordex_core::{OrgLink, Project};
use cordex_store::{CatalogStore, StoreError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use zip::ZipArchive;

pub const CRATE_NAME: &str = "cordex-sync";

/// CORDIS bulk export for the current framework programme.
pub const DEFAULT_SOURCE_URL: &str =
    "https://cordis.europa.eu/data/cordis-HORIZONprojects-csv.zip";

/// Insert batch size; bounds peak memory during the replace phase.
pub const BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Downloading,
    Extracting,
    Cleaning,
    Replacing,
    Indexing,
    Done,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync run is already in flight")]
    AlreadyRunning,
    #[error("archive download failed with http status {status}")]
    Download { status: u16 },
    #[error("archive download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("archive unreadable during {phase:?}: {message}")]
    Archive { phase: SyncPhase, message: String },
    #[error("sync run exceeded its wall-clock budget of {budget:?}")]
    Budget { budget: Duration },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_url: String,
    pub batch_size: usize,
    pub http_timeout: Duration,
    /// Budget for the whole run; the source is a multi-hundred-thousand-row
    /// remote dataset.
    pub run_budget: Duration,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            batch_size: BATCH_SIZE,
            http_timeout: Duration::from_secs(120),
            run_budget: Duration::from_secs(15 * 60),
            user_agent: "cordex-sync/0.1".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            source_url: std::env::var("CORDEX_SOURCE_URL")
                .unwrap_or(defaults.source_url),
            batch_size: std::env::var("CORDEX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.batch_size),
            http_timeout: std::env::var("CORDEX_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            run_budget: std::env::var("CORDEX_SYNC_BUDGET_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.run_budget),
            user_agent: std::env::var("CORDEX_USER_AGENT")
                .unwrap_or(defaults.user_agent),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub archive_sha256: String,
    pub archive_bytes: usize,
    pub projects_inserted: usize,
    pub organizations_inserted: usize,
    pub batches: usize,
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn CatalogStore>,
    client: reqwest::Client,
    running: Mutex<()>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn CatalogStore>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            config,
            store,
            client,
            running: Mutex::new(()),
        })
    }

    /// Full refresh from the remote source. Rejected when another run holds
    /// the guard; bounded by the configured wall-clock budget.
    pub async fn run_once(&self) -> Result<SyncRunSummary, SyncError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;

        let budget = self.config.run_budget;
        match tokio::time::timeout(budget, async {
            let bytes = self.download().await?;
            self.ingest(&bytes).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Budget { budget }),
        }
    }

    /// Refresh from already-downloaded archive bytes. Same guard, same
    /// phases minus the download.
    pub async fn ingest_archive(&self, bytes: &[u8]) -> Result<SyncRunSummary, SyncError> {
        let _guard = self
            .running
            .try_lock()
            .map_err(|_| SyncError::AlreadyRunning)?;
        self.ingest(bytes).await
    }

    async fn download(&self) -> Result<Vec<u8>, SyncError> {
        info!(
            phase = ?SyncPhase::Downloading,
            url = %self.config.source_url,
            "downloading bulk archive"
        );
        let response = self.client.get(&self.config.source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Download {
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn ingest(&self, bytes: &[u8]) -> Result<SyncRunSummary, SyncError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let archive_sha256 = hex::encode(Sha256::digest(bytes));

        info!(%run_id, phase = ?SyncPhase::Extracting, bytes = bytes.len(), "opening archive");
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| SyncError::Archive {
                phase: SyncPhase::Extracting,
                message: e.to_string(),
            })?;
        let raw_projects = read_prefixed_csv(&mut archive, "project")?;
        let raw_links = read_prefixed_csv(&mut archive, "organization")?;

        info!(
            %run_id,
            phase = ?SyncPhase::Cleaning,
            projects = raw_projects.len(),
            organizations = raw_links.len(),
            "cleaning records"
        );
        let projects: Vec<Project> = raw_projects
            .into_iter()
            .map(|raw| Project::from_raw(&clean_record(raw)))
            .collect();
        let links: Vec<OrgLink> = raw_links
            .into_iter()
            .map(|raw| OrgLink::from_raw(&clean_record(raw)))
            .collect();

        info!(%run_id, phase = ?SyncPhase::Replacing, "replacing catalog contents");
        let report = self
            .store
            .replace_catalog(projects, links, self.config.batch_size)
            .await?;

        info!(%run_id, phase = ?SyncPhase::Indexing, "rebuilding indexes");
        self.store.rebuild_indexes().await?;

        let finished_at = Utc::now();
        info!(
            %run_id,
            phase = ?SyncPhase::Done,
            projects = report.projects,
            organizations = report.organizations,
            "sync completed"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            archive_sha256,
            archive_bytes: bytes.len(),
            projects_inserted: report.projects,
            organizations_inserted: report.organizations,
            batches: report.batches,
        })
    }
}

/// Locate the first archive entry whose base name case-insensitively starts
/// with `prefix` and parse it as `;`-delimited CSV keyed by column header. A
/// missing entry yields zero records, not a failed run.
fn read_prefixed_csv<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    prefix: &str,
) -> Result<Vec<HashMap<String, String>>, SyncError> {
    let entry_name = archive
        .file_names()
        .find(|name| {
            let base = name.rsplit('/').next().unwrap_or(name);
            base.to_lowercase().starts_with(prefix)
        })
        .map(str::to_string);

    let Some(entry_name) = entry_name else {
        warn!(prefix, "no matching csv in archive; treating entity as empty");
        return Ok(Vec::new());
    };

    let mut entry = archive.by_name(&entry_name).map_err(|e| SyncError::Archive {
        phase: SyncPhase::Extracting,
        message: e.to_string(),
    })?;
    let mut text = String::new();
    entry.read_to_string(&mut text).map_err(|e| SyncError::Archive {
        phase: SyncPhase::Extracting,
        message: format!("{entry_name}: {e}"),
    })?;

    parse_delimited(&text).map_err(|e| SyncError::Archive {
        phase: SyncPhase::Extracting,
        message: format!("{entry_name}: {e}"),
    })
}

fn parse_delimited(text: &str) -> Result<Vec<HashMap<String, String>>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let record: HashMap<String, String> = headers
            .iter()
            .zip(row.iter())
            .map(|(header, field)| (header.to_string(), field.to_string()))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Drop empty header keys, strip a stray BOM, trim values.
fn clean_record(raw: HashMap<String, String>) -> HashMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim_start_matches('\u{feff}').trim().to_string();
            if key.is_empty() {
                return None;
            }
            Some((key, value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordex_store::MemoryCatalog;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const PROJECT_CSV: &str = "\
id;acronym;title;status;startDate;endDate;totalCost;ecMaxContribution;frameworkProgramme;objective;keywords
101;SUNRISE;Solar Energy Roadmap;SIGNED;2023-01-01;2026-12-31;3,000,000;2,499,975.50;HORIZON;Develop solar tech.;solar, energy
102;WINDY;Offshore Wind Pilot;ONGOING;2022-06-01;2025-05-31;bad-number;1,000,000;HORIZON;Wind at sea.;wind
";

    const ORG_CSV: &str = "\
projectID;organisationID;name;shortName;country;role;netEcContribution
101;A1;Example University;EXU;DE;coordinator;1,200,000
101;B2;Institut Exemple;IEX;FR;participant;800,000
102;A1;Example University;EXU;DE;coordinator;1,000,000
";

    fn archive_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start zip entry");
            writer.write_all(body.as_bytes()).expect("write zip entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    fn pipeline(store: Arc<MemoryCatalog>) -> SyncPipeline {
        SyncPipeline::new(SyncConfig::default(), store).expect("pipeline")
    }

    #[tokio::test]
    async fn ingest_populates_typed_catalog() {
        let store = Arc::new(MemoryCatalog::new());
        let sync = pipeline(store.clone());

        let bytes = archive_with(&[
            ("csv/project_2024.csv", PROJECT_CSV),
            ("csv/organization_2024.csv", ORG_CSV),
        ]);
        let summary = sync.ingest_archive(&bytes).await.unwrap();

        assert_eq!(summary.projects_inserted, 2);
        assert_eq!(summary.organizations_inserted, 3);
        assert_eq!(summary.archive_bytes, bytes.len());

        let project = store.project_by_id("101").await.unwrap().unwrap();
        assert_eq!(project.acronym, "SUNRISE");
        assert_eq!(project.eu_contribution, 2_499_975.50);
        let broken = store.project_by_id("102").await.unwrap().unwrap();
        // Unparsable totalCost resolves to the safe default.
        assert_eq!(broken.total_cost, 0.0);

        let links = store.links_for_project("101").await.unwrap();
        assert_eq!(links.len(), 2);
        assert!(links[0].is_coordinator());
    }

    #[tokio::test]
    async fn running_twice_is_idempotent() {
        let store = Arc::new(MemoryCatalog::new());
        let sync = pipeline(store.clone());
        let bytes = archive_with(&[("project.csv", PROJECT_CSV), ("organization.csv", ORG_CSV)]);

        let first = sync.ingest_archive(&bytes).await.unwrap();
        let second = sync.ingest_archive(&bytes).await.unwrap();

        assert_eq!(first.projects_inserted, second.projects_inserted);
        assert_eq!(first.organizations_inserted, second.organizations_inserted);
        assert_eq!(first.archive_sha256, second.archive_sha256);

        assert_eq!(store.scan_projects().await.unwrap().len(), 2);
        assert_eq!(store.scan_links().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_entity_file_is_tolerated() {
        let store = Arc::new(MemoryCatalog::new());
        let sync = pipeline(store.clone());
        let bytes = archive_with(&[("project.csv", PROJECT_CSV)]);

        let summary = sync.ingest_archive(&bytes).await.unwrap();
        assert_eq!(summary.projects_inserted, 2);
        assert_eq!(summary.organizations_inserted, 0);
    }

    #[tokio::test]
    async fn garbage_archive_fails_in_the_extract_phase() {
        let sync = pipeline(Arc::new(MemoryCatalog::new()));
        match sync.ingest_archive(b"definitely not a zip").await {
            Err(SyncError::Archive { phase, .. }) => assert_eq!(phase, SyncPhase::Extracting),
            other => panic!("expected archive error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_runs_are_rejected() {
        let sync = pipeline(Arc::new(MemoryCatalog::new()));
        let bytes = archive_with(&[("project.csv", PROJECT_CSV)]);

        let _held = sync.running.try_lock().unwrap();
        match sync.ingest_archive(&bytes).await {
            Err(SyncError::AlreadyRunning) => {}
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
    }

    #[test]
    fn record_cleaning_drops_empty_keys_and_trims() {
        let mut raw = HashMap::new();
        raw.insert("\u{feff}id".to_string(), " 101 ".to_string());
        raw.insert("  ".to_string(), "orphan".to_string());
        raw.insert("title".to_string(), " Trimmed ".to_string());

        let cleaned = clean_record(raw);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned["id"], "101");
        assert_eq!(cleaned["title"], "Trimmed");
    }
}
