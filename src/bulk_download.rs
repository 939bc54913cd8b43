use crate::error::{DownloadError, TransportError};
use crate::planet::ImageSource;
use crate::progress::Progress;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub index: usize,
    pub url: Url,
}

impl DownloadTask {
    pub fn new(index: usize, url: Url) -> Self {
        DownloadTask { index, url }
    }

    pub fn file_name(&self) -> String {
        format!("img{}.tif", self.index)
    }
}

/// Links numbered from 1 in the order they were read. The number picks the
/// output file name and says nothing about which coordinate the link came from.
#[derive(Debug, Default, PartialEq)]
pub struct DownloadPlan {
    tasks: Vec<DownloadTask>,
}

impl DownloadPlan {
    pub fn from_links(links: Vec<Url>) -> Self {
        let tasks = links
            .into_iter()
            .enumerate()
            .map(|(i, url)| DownloadTask::new(i + 1, url))
            .collect();
        Self { tasks }
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }
}

#[derive(Debug, Default)]
pub struct DownloadReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(DownloadTask, DownloadError)>,
}

pub struct BulkDownloader<S> {
    source: Arc<S>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

impl<S: ImageSource> BulkDownloader<S> {
    pub fn new(source: Arc<S>, idle_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            source,
            idle_timeout,
            cancel,
        }
    }

    /// Fetches every link into `output_dir/img{i}.tif` with at most `concurrency`
    /// transfers in flight. Only failing to create `output_dir` aborts the batch.
    pub async fn download_all(
        &self,
        links: Vec<Url>,
        output_dir: &Path,
        concurrency: usize,
        progress: Arc<Progress>,
    ) -> Result<DownloadReport, DownloadError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| DownloadError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?;

        let plan = DownloadPlan::from_links(links);
        info!(
            links = plan.tasks().len(),
            output_dir = %output_dir.display(),
            concurrency,
            "Starting downloads"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for task in plan.tasks {
            let semaphore = semaphore.clone();
            let source = self.source.clone();
            let progress = progress.clone();
            let cancel = self.cancel.clone();
            let idle_timeout = self.idle_timeout;
            let output_dir = output_dir.to_path_buf();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        try_download(source.as_ref(), &task, &output_dir, idle_timeout, &cancel)
                            .await
                    }
                    Err(_) => Err(DownloadError::Cancelled),
                };
                progress.tick();
                (task, result)
            });
        }

        let mut report = DownloadReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(path))) => report.written.push(path),
                Ok((task, Err(e))) => {
                    log_failure(&task, &e);
                    report.failed.push((task, e));
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => warn!(error = %e, "Download task did not finish"),
            }
        }
        report.written.sort();

        info!(
            written = report.written.len(),
            failed = report.failed.len(),
            "Downloads finished"
        );
        Ok(report)
    }
}

fn log_failure(task: &DownloadTask, e: &DownloadError) {
    match e {
        DownloadError::PartialWrite { path, bytes, .. }
        | DownloadError::CancelledPartial { path, bytes, .. } => error!(
            url = %task.url,
            partial = %path.display(),
            bytes,
            error = %e,
            "Download interrupted, partial file kept"
        ),
        _ => warn!(url = %task.url, error = %e, "Failed to download"),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError {
    let path = path.to_path_buf();
    move |source| DownloadError::Io { path, source }
}

pub fn partial_path(dst: &Path) -> PathBuf {
    let mut name = dst.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Why a body stopped before its end.
enum Interruption {
    Cancelled,
    Transport(TransportError),
    Disk(std::io::Error),
}

/// Streams one link to `output_dir/img{index}.tif`, overwriting any earlier copy.
///
/// Bytes land in a `.partial` file that is renamed once the body is complete.
/// A body that breaks off or is cancelled after some bytes were written is
/// reported as [`DownloadError::PartialWrite`] or
/// [`DownloadError::CancelledPartial`] and the partial file is left on disk.
/// An empty partial file is always removed, and so is one the disk refused to
/// write.
pub async fn try_download(
    source: &impl ImageSource,
    task: &DownloadTask,
    output_dir: &Path,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<PathBuf, DownloadError> {
    let dst = output_dir.join(task.file_name());
    let partial = partial_path(&dst);

    let mut body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        body = source.open(&task.url) => body?,
    };

    let file = tokio::fs::File::create(&partial)
        .await
        .map_err(io_error(&partial))?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut byte_count = 0_u64;

    let interruption = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Interruption::Cancelled,
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };
        match next {
            Ok(Some(Ok(bytes))) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    break Interruption::Disk(e);
                }
                byte_count += bytes.len() as u64;
            }
            Ok(Some(Err(e))) => break Interruption::Transport(e),
            Ok(None) => {
                if let Err(e) = writer.flush().await {
                    break Interruption::Disk(e);
                }
                drop(writer);
                tokio::fs::rename(&partial, &dst)
                    .await
                    .map_err(io_error(&dst))?;
                debug!(url = %task.url, path = %dst.display(), bytes = byte_count, "Downloaded");
                return Ok(dst);
            }
            Err(_) => {
                break Interruption::Transport(TransportError::TimedOut {
                    url: task.url.clone(),
                    after: idle_timeout,
                })
            }
        }
    };

    let cause = match interruption {
        Interruption::Disk(source) => {
            drop(writer);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::Io {
                path: partial,
                source,
            });
        }
        Interruption::Cancelled => None,
        Interruption::Transport(e) => Some(e),
    };

    // Keep whatever arrived so the partial file matches the byte count.
    let _ = writer.flush().await;
    drop(writer);

    if byte_count == 0 {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(cause.map_or(DownloadError::Cancelled, DownloadError::Transport));
    }
    let url = task.url.clone();
    let bytes = byte_count;
    Err(match cause {
        Some(source) => DownloadError::PartialWrite {
            url,
            path: partial,
            bytes,
            source,
        },
        None => DownloadError::CancelledPartial {
            url,
            path: partial,
            bytes,
        },
    })
}
