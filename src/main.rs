use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use ortho_fetch::activation::ActivationWorkflow;
use ortho_fetch::bulk_download::{self, BulkDownloader};
use ortho_fetch::coordinates::read_coordinates;
use ortho_fetch::link_sink::{read_links, LinkSink, LINKS_FILE_NAME};
use ortho_fetch::orchestrator::{self, process_all};
use ortho_fetch::planet::{HttpImageSource, PlanetClient};
use ortho_fetch::progress::Progress;
use ortho_fetch::settings::{Credential, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about = "Find and download PlanetScope ortho analytic imagery for a list of coordinates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search, activate and collect download links for every coordinate
    Links(LinksArgs),
    /// Download every link collected by `links`
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
struct LinksArgs {
    /// Path to coordinates csv file
    #[arg(short = 'f', long, default_value = "locations.csv")]
    filepath: PathBuf,
    /// Earliest acquisition date, e.g. 2016-08-31T00:00:00.000Z
    #[arg(short = 's', long)]
    start_date: Option<DateTime<Utc>>,
    /// Latest acquisition date
    #[arg(short = 'e', long)]
    end_date: Option<DateTime<Utc>>,
    /// Height of output images (px)
    #[arg(long, default_value_t = 512)]
    height: u32,
    /// Width of output images (px)
    #[arg(short = 'w', long, default_value_t = 512)]
    width: u32,
    /// Ground resolution (m/px)
    #[arg(short = 'r', long, default_value_t = 3.0)]
    resolution: f64,
    /// Directory receiving the link file
    #[arg(short = 'o', long, default_value = "output_images")]
    output_dir: PathBuf,
    /// Number of coordinates processed in parallel
    #[arg(short = 'p', long, default_value_t = orchestrator::DEFAULT_CONCURRENCY)]
    parallel: usize,
    /// Maximum cloud cover fraction
    #[arg(long)]
    max_cloud: Option<f64>,
    #[arg(long)]
    item_type: Option<String>,
    #[arg(long)]
    lat_column: Option<String>,
    #[arg(long)]
    lon_column: Option<String>,
    /// Seconds between activation status checks, at least 1
    #[arg(long)]
    poll_interval: Option<u64>,
    /// Seconds to wait for an asset to activate, 0 waits forever
    #[arg(long)]
    max_wait: Option<u64>,
    /// Seconds before an API request is abandoned
    #[arg(long)]
    request_timeout: Option<u64>,
    /// TOML file with defaults for the options above
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Link file, defaults to <output-dir>/download_links.txt
    #[arg(short = 'l', long)]
    links_file: Option<PathBuf>,
    #[arg(short = 'o', long, default_value = "output_images")]
    output_dir: PathBuf,
    /// Image directory, defaults to <output-dir>/downloaded_images
    #[arg(short = 'd', long)]
    image_dir: Option<PathBuf>,
    /// Number of parallel downloads
    #[arg(short = 'p', long, default_value_t = bulk_download::DEFAULT_CONCURRENCY)]
    parallel: usize,
    /// Seconds to wait for a response or the next chunk of a body
    #[arg(long, default_value_t = 60)]
    request_timeout: u64,
}

impl LinksArgs {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::read(path)?,
            None => Settings::default(),
        };
        if let Some(start) = self.start_date {
            settings.search.start_date = start;
        }
        if let Some(end) = self.end_date {
            settings.search.end_date = end;
        }
        if let Some(max_cloud) = self.max_cloud {
            settings.search.max_cloud = max_cloud;
        }
        if let Some(item_type) = &self.item_type {
            settings.item_type = item_type.clone();
        }
        if let Some(column) = &self.lat_column {
            settings.columns.latitude = column.clone();
        }
        if let Some(column) = &self.lon_column {
            settings.columns.longitude = column.clone();
        }
        if let Some(secs) = self.poll_interval {
            settings.poll_interval_secs = secs;
        }
        if let Some(secs) = self.max_wait {
            settings.max_wait_secs = secs;
        }
        if let Some(secs) = self.request_timeout {
            settings.request_timeout_secs = secs;
        }
        Ok(settings)
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ortho_fetch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Token cancelled on Ctrl-C so long activation waits can be abandoned.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight requests");
            token.cancel();
        }
    });
    cancel
}

async fn collect_links(args: LinksArgs) -> Result<()> {
    let settings = args.settings()?;
    let credential = Credential::from_env()?;
    info!(?settings, "Loaded settings");

    let sheet = read_coordinates(&args.filepath, &settings.columns)?;
    if !sheet.malformed.is_empty() {
        warn!(rows = sheet.malformed.len(), "Some rows were skipped");
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Unable to create {}", args.output_dir.display()))?;
    let links_path = args.output_dir.join(LINKS_FILE_NAME);
    let sink = LinkSink::open(&links_path)
        .await
        .with_context(|| format!("Unable to open {}", links_path.display()))?;

    let client = PlanetClient::new(
        settings.api_url.clone(),
        credential,
        settings.request_timeout(),
    )?;
    let workflow = ActivationWorkflow::new(
        Arc::new(client),
        Arc::new(sink),
        settings.search.clone(),
        &settings.item_type,
        settings.poll_policy(),
        cancel_on_ctrl_c(),
    );

    // The search footprint is square, so cover the larger side.
    let size_px = args.width.max(args.height);
    let total = sheet.coordinates.len();
    let progress = Arc::new(Progress::new(total as u64, "Activating assets"));
    let report = process_all(
        Arc::new(workflow),
        sheet.coordinates,
        size_px,
        args.resolution,
        args.parallel,
        progress.clone(),
    )
    .await;
    progress.finish(&format!("{} links written to {}", report.linked.len(), links_path.display()));

    info!(
        linked = report.linked.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        malformed_rows = sheet.malformed.len(),
        "Done"
    );
    Ok(())
}

async fn download_images(args: DownloadArgs) -> Result<()> {
    let links_path = args
        .links_file
        .unwrap_or_else(|| args.output_dir.join(LINKS_FILE_NAME));
    let image_dir = args
        .image_dir
        .unwrap_or_else(|| args.output_dir.join("downloaded_images"));

    let links = read_links(&links_path)
        .await
        .with_context(|| format!("Unable to read {}", links_path.display()))?;
    info!(links = links.len(), file = %links_path.display(), "Total URLs to download");

    let timeout = Duration::from_secs(args.request_timeout);
    let source = HttpImageSource::new(timeout)?;
    let downloader = BulkDownloader::new(Arc::new(source), timeout, cancel_on_ctrl_c());
    let progress = Arc::new(Progress::new(links.len() as u64, "Downloading images"));
    let report = downloader
        .download_all(links, &image_dir, args.parallel, progress.clone())
        .await?;
    progress.finish(&format!("{} images in {}", report.written.len(), image_dir.display()));
    info!(
        written = report.written.len(),
        failed = report.failed.len(),
        image_dir = %image_dir.display(),
        "Done"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Links(args) => collect_links(args).await,
        Command::Download(args) => download_images(args).await,
    }
}
