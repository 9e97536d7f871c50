use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};

use crate::decoder::{ExtractionResult, TagDecoder, DEFAULT_DECODE_TIMEOUT};
use crate::error::SyncError;
use crate::library::{source_key, FailedFile, FailureReason, SyncReport, TrackMetadata};
use crate::playlists::PlaylistBuilder;
use crate::repository::CatalogRepository;
use crate::walker::walk;

const PATH_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub batch_size: usize,
    pub decode_timeout: Duration,
    /// Pause after each committed batch; zero only yields.
    pub batch_pause: Duration,
    pub show_progress: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            decode_timeout: DEFAULT_DECODE_TIMEOUT,
            batch_pause: Duration::from_millis(100),
            show_progress: true,
        }
    }
}

/// Cloneable stop signal for a running synchronization pass.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Exclusive right to run a catalog pass, taken with [`Synchronizer::try_reserve`].
/// The pass slot is released when the permit is dropped.
pub struct ScanPermit {
    _guard: OwnedMutexGuard<()>,
}

/// Walks a music directory and adds every new file to the catalog.
///
/// Only one pass runs at a time; a second call while one is in flight fails
/// with [`SyncError::AlreadyRunning`]. Each batch is committed atomically, so
/// cancelling between batches leaves a valid, partial catalog.
pub struct Synchronizer {
    repository: Arc<dyn CatalogRepository>,
    decoder: TagDecoder,
    config: ScanConfig,
    progress: Option<MultiProgress>,
    running: Arc<Mutex<()>>,
    cancel: CancelHandle,
    last_report: RwLock<Option<SyncReport>>,
}

impl Synchronizer {
    pub fn new(repository: Arc<dyn CatalogRepository>, config: ScanConfig) -> Self {
        let config = ScanConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            repository,
            decoder: TagDecoder::new(config.decode_timeout),
            config,
            progress: None,
            running: Arc::new(Mutex::new(())),
            cancel: CancelHandle::default(),
            last_report: RwLock::new(None),
        }
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Asks the in-flight pass to stop after its current batch.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().await.clone()
    }

    /// Claims the pass slot without waiting.
    pub fn try_reserve(&self) -> Result<ScanPermit, SyncError> {
        let guard = self
            .running
            .clone()
            .try_lock_owned()
            .map_err(|_| SyncError::AlreadyRunning)?;
        Ok(ScanPermit { _guard: guard })
    }

    pub async fn synchronize(&self, root: &Path) -> Result<SyncReport, SyncError> {
        let permit = self.try_reserve()?;
        self.synchronize_reserved(&permit, root).await
    }

    /// Runs a pass in a slot already claimed with [`Synchronizer::try_reserve`].
    pub async fn synchronize_reserved(
        &self,
        _permit: &ScanPermit,
        root: &Path,
    ) -> Result<SyncReport, SyncError> {
        self.cancel.reset();

        info!("Starting catalog synchronization at: {}", root.display());
        let progress = self.progress_bar();
        let result = self.run(root, &progress).await;
        progress.finish_and_clear();

        match &result {
            Ok(report) => {
                info!(
                    "Synchronization finished: {} scanned, {} inserted, {} already cataloged, {} failed{}",
                    report.scanned,
                    report.inserted,
                    report.skipped_existing,
                    report.failed.len(),
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                *self.last_report.write().await = Some(report.clone());
            }
            Err(e) => error!("Synchronization aborted: {}", e),
        }

        result
    }

    async fn run(&self, root: &Path, progress: &ProgressBar) -> Result<SyncReport, SyncError> {
        // One snapshot per run; paths are added as they are seen so a path is
        // never decoded twice in the same pass.
        let mut known: HashSet<String> = self.repository.existing_source_paths().await?;
        debug!("{} tracks already cataloged", known.len());

        let (tx, mut rx) = mpsc::channel::<PathBuf>(PATH_CHANNEL_CAPACITY);
        let walk_root = root.to_path_buf();
        let walker = tokio::task::spawn_blocking(move || {
            for path in walk(&walk_root) {
                if tx.blocking_send(path).is_err() {
                    break;
                }
            }
        });

        let mut report = SyncReport::default();
        let mut batch: Vec<TrackMetadata> = Vec::with_capacity(self.config.batch_size);

        while let Some(path) = rx.recv().await {
            // Nothing is pending, so stopping here loses no work.
            if batch.is_empty() && self.cancel.is_cancelled() {
                info!("Synchronization cancelled after {} inserts", report.inserted);
                report.cancelled = true;
                break;
            }
            report.scanned += 1;
            progress.inc(1);

            if !known.insert(source_key(&path)) {
                report.skipped_existing += 1;
                continue;
            }

            match self.decoder.decode(&path).await {
                ExtractionResult::Ok(metadata) => batch.push(metadata),
                ExtractionResult::Failed { path, reason } => {
                    warn!("Skipping {}: {}", path.display(), reason);
                    report.failed.push(FailedFile {
                        path,
                        reason: FailureReason::Decode(reason),
                    });
                }
            }

            if batch.len() >= self.config.batch_size {
                self.flush(&mut batch, &mut report).await?;
                if self.cancel.is_cancelled() {
                    info!("Synchronization cancelled after {} inserts", report.inserted);
                    report.cancelled = true;
                    break;
                }
                self.pause().await;
            }
        }

        if !report.cancelled {
            self.flush(&mut batch, &mut report).await?;
        }

        drop(rx);
        if let Err(e) = walker.await {
            warn!("Directory walk ended abnormally: {}", e);
        }

        Ok(report)
    }

    /// Commits the pending batch. A failed batch is rolled back and recorded
    /// against its files; only an unreachable store aborts the run.
    async fn flush(
        &self,
        batch: &mut Vec<TrackMetadata>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if batch.is_empty() {
            return Ok(());
        }
        let records = std::mem::take(batch);

        match self.repository.bulk_insert_tracks(&records).await {
            Ok(inserted) => {
                let inserted = usize::try_from(inserted).unwrap_or(records.len());
                report.inserted += inserted;
                report.skipped_existing += records.len().saturating_sub(inserted);
                debug!("Committed batch of {} tracks ({} new)", records.len(), inserted);
                Ok(())
            }
            Err(e) if e.is_unavailable() => Err(SyncError::Repository(e)),
            Err(e) => {
                error!("Batch of {} tracks rolled back: {}", records.len(), e);
                let message = e.to_string();
                report.failed.extend(records.into_iter().map(|record| FailedFile {
                    path: PathBuf::from(record.source_path),
                    reason: FailureReason::BatchWrite(message.clone()),
                }));
                Ok(())
            }
        }
    }

    async fn pause(&self) {
        if self.config.batch_pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.batch_pause).await;
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        let multi = match &self.progress {
            Some(multi) if self.config.show_progress => multi,
            _ => return ProgressBar::hidden(),
        };

        let bar = multi.add(ProgressBar::new_spinner());
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} files scanned ({per_sec})")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

/// Synchronizes `root` and then rebuilds the derived playlists.
pub async fn refresh_catalog(synchronizer: &Synchronizer, playlists: &PlaylistBuilder, root: &Path) {
    match synchronizer.try_reserve() {
        Ok(permit) => refresh_reserved(permit, synchronizer, playlists, root).await,
        Err(_) => info!("Synchronization already in progress, skipping refresh"),
    }
}

/// Same as [`refresh_catalog`] with the pass slot already claimed. The slot
/// stays held until the playlist rebuild has finished.
pub async fn refresh_reserved(
    permit: ScanPermit,
    synchronizer: &Synchronizer,
    playlists: &PlaylistBuilder,
    root: &Path,
) {
    if let Err(e) = synchronizer.synchronize_reserved(&permit, root).await {
        error!("Error during synchronization: {}", e);
        return;
    }

    if let Err(e) = playlists.rebuild_derived_playlists().await {
        error!("Error rebuilding derived playlists: {}", e);
    }
    drop(permit);
}
