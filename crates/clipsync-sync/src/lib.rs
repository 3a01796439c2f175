//! Sync orchestration: configuration, the single-flight engine and the
//! scheduled service that drives it.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clipsync_adapters::{
    legacy_notes, materialize, ApiConfig, ClippingSource, LegacyFeed, LegacyNote,
    RetryDisposition, SourceError, DEFAULT_API_BASE_URL,
};
use clipsync_core::{derive_path, Clipping, PathError, VaultPath};
use clipsync_storage::{
    ConflictPolicy, DirectoryMode, FileWriter, LocalVault, SaveOutcome, ScopedWriter,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Upper bound on legacy pages drained in one run.
pub const MAX_LEGACY_PAGES: usize = 100;

const ENV_PREFIX: &str = "CLIPSYNC_";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub access_token: String,
    pub vault_dir: PathBuf,
    /// Folder inside the vault that receives clippings; empty means the root.
    pub sync_folder: String,
    pub sync_interval_secs: u64,
    pub idle_threshold_secs: u64,
    pub http_timeout_secs: u64,
    pub directory_mode: DirectoryMode,
    pub incremental: bool,
    pub legacy_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: String::new(),
            vault_dir: PathBuf::from("."),
            sync_folder: "Clippings".to_string(),
            sync_interval_secs: 300,
            idle_threshold_secs: 6,
            http_timeout_secs: 60,
            directory_mode: DirectoryMode::default(),
            incremental: true,
            legacy_enabled: false,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Reads `path` as YAML when given, then lets `CLIPSYNC_*` variables win.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_yaml::from_str::<Self>(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some(value) = var("ACCESS_TOKEN") {
            self.access_token = value;
        }
        if let Some(value) = var("VAULT_DIR") {
            self.vault_dir = PathBuf::from(value);
        }
        if let Some(value) = var("SYNC_FOLDER") {
            self.sync_folder = value;
        }
        if let Some(value) = var("SYNC_INTERVAL_SECS").and_then(|v| parse_or_warn("SYNC_INTERVAL_SECS", &v)) {
            self.sync_interval_secs = value;
        }
        if let Some(value) = var("IDLE_THRESHOLD_SECS").and_then(|v| parse_or_warn("IDLE_THRESHOLD_SECS", &v)) {
            self.idle_threshold_secs = value;
        }
        if let Some(value) = var("HTTP_TIMEOUT_SECS").and_then(|v| parse_or_warn("HTTP_TIMEOUT_SECS", &v)) {
            self.http_timeout_secs = value;
        }
        if let Some(value) = var("DIRECTORY_MODE").and_then(|v| parse_or_warn("DIRECTORY_MODE", &v)) {
            self.directory_mode = value;
        }
        if let Some(value) = var("INCREMENTAL") {
            self.incremental = parse_flag(&value);
        }
        if let Some(value) = var("LEGACY_ENABLED") {
            self.legacy_enabled = parse_flag(&value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.sync_interval_secs > 0, "sync_interval_secs must be positive");
        anyhow::ensure!(self.http_timeout_secs > 0, "http_timeout_secs must be positive");
        self.sync_folder_path()?;
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.api_base_url.clone(),
            timeout: Duration::from_secs(self.http_timeout_secs),
            ..ApiConfig::default()
        }
    }

    pub fn sync_folder_path(&self) -> Result<Option<VaultPath>> {
        if self.sync_folder.trim().is_empty() {
            return Ok(None);
        }
        VaultPath::new(&self.sync_folder)
            .map(Some)
            .with_context(|| format!("invalid sync_folder `{}`", self.sync_folder))
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    let parsed = value.parse().ok();
    if parsed.is_none() {
        warn!(var = %format!("{ENV_PREFIX}{name}"), value, "ignoring unparseable environment value");
    }
    parsed
}

/// User-visible status messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!("{message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickReason {
    Startup,
    Interval,
    Resumed,
    Manual,
}

impl fmt::Display for TickReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Startup => "startup",
            Self::Interval => "interval",
            Self::Resumed => "resumed",
            Self::Manual => "manual",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub path: Option<VaultPath>,
    pub reason: String,
    /// Path derivation failures repeat on every fetch; write failures may clear up.
    pub disposition: RetryDisposition,
}

impl ItemFailure {
    fn new(id: impl Into<String>, path: Option<VaultPath>, err: &anyhow::Error) -> Self {
        let disposition = if err.downcast_ref::<PathError>().is_some() {
            RetryDisposition::NonRetryable
        } else {
            RetryDisposition::Retryable
        };
        Self {
            id: id.into(),
            path,
            reason: format!("{err:#}"),
            disposition,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub written: usize,
    pub skipped: usize,
    pub legacy_written: usize,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    fn new(run_id: Uuid, source: &str, started_at: DateTime<Utc>, fetched: usize) -> Self {
        Self {
            run_id,
            source: source.to_string(),
            started_at,
            finished_at: started_at,
            fetched,
            written: 0,
            skipped: 0,
            legacy_written: 0,
            failures: Vec::new(),
        }
    }

    fn has_retryable_failures(&self) -> bool {
        self.failures
            .iter()
            .any(|failure| failure.disposition == RetryDisposition::Retryable)
    }

    fn record(&mut self, outcome: SaveOutcome, legacy: bool) {
        match (outcome.wrote(), legacy) {
            (true, false) => self.written += 1,
            (true, true) => self.legacy_written += 1,
            (false, _) => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// Another sync held the guard; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync aborted: {0}")]
    Source(#[from] SourceError),
}

impl SyncError {
    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            Self::Source(err) => err.retry_disposition(),
        }
    }
}

/// Holds the single-flight flag; dropping it lets the next sync in.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct SyncEngine {
    source: Arc<dyn ClippingSource>,
    writer: Arc<dyn FileWriter>,
    notifier: Arc<dyn Notifier>,
    base_folder: Option<VaultPath>,
    legacy: Option<Arc<dyn LegacyFeed>>,
    incremental: bool,
    in_progress: AtomicBool,
    checkpoint: Mutex<Option<String>>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ClippingSource>,
        writer: Arc<dyn FileWriter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            writer,
            notifier,
            base_folder: None,
            legacy: None,
            incremental: true,
            in_progress: AtomicBool::new(false),
            checkpoint: Mutex::new(None),
        }
    }

    /// Engine writing under `<vault_dir>/<sync_folder>` with the configured
    /// directory mode and a tracing notifier.
    pub fn from_config(
        config: &SyncConfig,
        source: Arc<dyn ClippingSource>,
        legacy: Option<Arc<dyn LegacyFeed>>,
    ) -> Result<Self> {
        let writer = ScopedWriter::new(LocalVault::new(config.vault_dir.clone()))
            .with_directory_mode(config.directory_mode);
        let mut engine = Self::new(source, Arc::new(writer), Arc::new(LogNotifier))
            .with_incremental(config.incremental);
        if let Some(folder) = config.sync_folder_path()? {
            engine = engine.with_base_folder(folder);
        }
        if let Some(feed) = legacy.filter(|_| config.legacy_enabled) {
            engine = engine.with_legacy_feed(feed);
        }
        Ok(engine)
    }

    pub fn with_base_folder(mut self, folder: VaultPath) -> Self {
        self.base_folder = Some(folder);
        self
    }

    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    pub fn with_legacy_feed(mut self, feed: Arc<dyn LegacyFeed>) -> Self {
        self.legacy = Some(feed);
        self
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn checkpoint(&self) -> Option<String> {
        self.checkpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn advance_checkpoint(&self, saved_at: &str) {
        let mut checkpoint = self
            .checkpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if checkpoint.as_deref().map_or(true, |current| saved_at > current) {
            *checkpoint = Some(saved_at.to_string());
        }
    }

    /// Runs one sync unless another is in flight.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = SyncGuard::acquire(&self.in_progress) else {
            debug!(source = self.source.label(), "sync already in progress; skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", run_id = %run_id, source = self.source.label());
        let report = self.run(run_id).instrument(span).await?;
        Ok(SyncOutcome::Completed(report))
    }

    /// Timer/activity entry point: never fails, reports problems through the
    /// notifier instead.
    pub async fn tick(&self, reason: TickReason) -> Option<SyncReport> {
        match self.sync().await {
            Ok(SyncOutcome::Completed(report)) => {
                if !report.failures.is_empty() {
                    self.notifier.notify(&format!(
                        "{} clipping(s) could not be saved; see the log for details",
                        report.failures.len()
                    ));
                }
                Some(report)
            }
            Ok(SyncOutcome::AlreadyRunning) => None,
            Err(err) => {
                warn!(%reason, error = %err, "sync failed");
                match err.retry_disposition() {
                    RetryDisposition::NonRetryable => self
                        .notifier
                        .notify("Clipping sync failed: check your access token"),
                    RetryDisposition::Retryable => self
                        .notifier
                        .notify(&format!("Clipping sync failed, will retry: {err}")),
                }
                None
            }
        }
    }

    async fn run(&self, run_id: Uuid) -> Result<SyncReport, SyncError> {
        let started_at = Utc::now();
        let after = if self.incremental { self.checkpoint() } else { None };
        let clippings = self.source.sync(after.as_deref()).await?;
        let mut report = SyncReport::new(run_id, self.source.label(), started_at, clippings.len());

        for clipping in &clippings {
            match self.write_clipping(clipping).await {
                Ok(outcome) => report.record(outcome, false),
                Err((path, err)) => {
                    warn!(id = %clipping.id, kind = %clipping.kind, error = %format!("{err:#}"), "failed to save clipping");
                    report
                        .failures
                        .push(ItemFailure::new(clipping.id.clone(), path, &err));
                }
            }
        }

        // Only failures a later run could fix hold the checkpoint back.
        if self.incremental && !report.has_retryable_failures() {
            let latest = clippings
                .iter()
                .map(|c| c.saved_at.as_str())
                .filter(|saved_at| !saved_at.is_empty())
                .max();
            if let Some(latest) = latest {
                self.advance_checkpoint(latest);
            }
        }

        if let Some(feed) = &self.legacy {
            self.sync_legacy(feed.as_ref(), &mut report).await?;
        }

        report.finished_at = Utc::now();
        info!(
            fetched = report.fetched,
            written = report.written,
            skipped = report.skipped,
            legacy_written = report.legacy_written,
            failures = report.failures.len(),
            "sync finished"
        );
        Ok(report)
    }

    fn scoped(&self, relative: &VaultPath) -> VaultPath {
        match &self.base_folder {
            Some(base) => base.join(relative),
            None => relative.clone(),
        }
    }

    async fn write_clipping(
        &self,
        clipping: &Clipping,
    ) -> Result<SaveOutcome, (Option<VaultPath>, anyhow::Error)> {
        let materialized = materialize(clipping);
        let relative = derive_path(&clipping.kind, &materialized.document.metadata)
            .map_err(|err| (None, anyhow::Error::from(err)))?;
        let path = self.scoped(&relative);

        self.writer
            .save_file(&path, &materialized.contents, ConflictPolicy::Skip)
            .await
            .map_err(|err| (Some(path.clone()), err.context(format!("writing {path}"))))
    }

    async fn sync_legacy(
        &self,
        feed: &dyn LegacyFeed,
        report: &mut SyncReport,
    ) -> Result<(), SourceError> {
        for page_no in 0..MAX_LEGACY_PAGES {
            let page = feed.next_page().await?;
            if page.is_empty() {
                debug!(pages = page_no, "legacy feed drained");
                return Ok(());
            }

            for note in legacy_notes(&page) {
                let result = match note {
                    Ok(note) => self.write_legacy_note(&note).await,
                    Err(err) => Err((None, anyhow::Error::from(err))),
                };
                match result {
                    Ok(outcome) => report.record(outcome, true),
                    Err((path, err)) => {
                        warn!(error = %format!("{err:#}"), "failed to save legacy note");
                        report.failures.push(ItemFailure::new("legacy", path, &err));
                    }
                }
            }
        }

        warn!(max_pages = MAX_LEGACY_PAGES, "legacy feed still has data; continuing next run");
        Ok(())
    }

    async fn write_legacy_note(
        &self,
        note: &LegacyNote,
    ) -> Result<SaveOutcome, (Option<VaultPath>, anyhow::Error)> {
        let path = self.scoped(note.path());
        let result = match note {
            LegacyNote::Page { contents, .. } => {
                self.writer
                    .save_file(&path, contents, ConflictPolicy::Skip)
                    .await
            }
            LegacyNote::Highlight { header, entry, .. } => {
                self.writer.append_to_file(&path, header, entry).await
            }
        };
        result.map_err(|err| (Some(path.clone()), err.context(format!("writing {path}"))))
    }
}

/// Decides whether a burst of user activity follows an idle period.
#[derive(Debug)]
pub struct ActivityMonitor {
    idle_threshold: Duration,
    last_activity: Mutex<Instant>,
}

impl ActivityMonitor {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            idle_threshold,
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn record_activity(&self) -> bool {
        self.record_activity_at(Instant::now())
    }

    /// True when more than the idle threshold passed since the previous
    /// activity. Always moves the last-activity time forward.
    pub fn record_activity_at(&self, now: Instant) -> bool {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let resumed = now.saturating_duration_since(*last) > self.idle_threshold;
        if now > *last {
            *last = now;
        }
        resumed
    }
}

/// Recurring sync job plus the activity trigger.
pub struct SyncService {
    engine: Arc<SyncEngine>,
    monitor: ActivityMonitor,
    scheduler: JobScheduler,
}

impl SyncService {
    pub async fn start(
        engine: Arc<SyncEngine>,
        period: Duration,
        idle_threshold: Duration,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await.context("creating scheduler")?;

        let job_engine = Arc::clone(&engine);
        let job = Job::new_repeated_async(period, move |_uuid, _l| {
            let engine = Arc::clone(&job_engine);
            Box::pin(async move {
                engine.tick(TickReason::Interval).await;
            })
        })
        .with_context(|| format!("creating sync job every {}s", period.as_secs()))?;
        scheduler.add(job).await.context("adding sync job")?;
        scheduler.start().await.context("starting scheduler")?;
        info!(period_secs = period.as_secs(), "sync service started");

        Ok(Self {
            engine,
            monitor: ActivityMonitor::new(idle_threshold),
            scheduler,
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Feeds the activity monitor; spawns a sync when activity resumes after
    /// an idle period.
    pub fn activity(&self) -> Option<JoinHandle<()>> {
        if !self.monitor.record_activity() {
            return None;
        }
        debug!("activity after idle period; triggering sync");
        let engine = Arc::clone(&self.engine);
        Some(tokio::spawn(async move {
            engine.tick(TickReason::Resumed).await;
        }))
    }

    /// Stops the recurring job. A sync already running finishes on its own.
    pub async fn shutdown(mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .context("stopping scheduler")?;
        info!("sync service stopped");
        Ok(())
    }
}
