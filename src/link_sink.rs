//! Newline-delimited file of download links, appended to by concurrent workflows.
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

pub const LINKS_FILE_NAME: &str = "download_links.txt";

pub struct LinkSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl LinkSink {
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one whole line per call; concurrent callers are serialised.
    pub async fn append(&self, link: &Url) -> io::Result<()> {
        let line = format!("{}\n", link);
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Links in file order. Blank lines are ignored, unparseable ones are logged and skipped.
pub async fn read_links<P: AsRef<Path>>(path: P) -> io::Result<Vec<Url>> {
    let content = fs::read_to_string(path.as_ref()).await?;
    let links = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match Url::parse(line.trim()) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(line = idx + 1, text = line, error = %e, "Skipping invalid link");
                None
            }
        })
        .collect();
    Ok(links)
}
