//! `loupe`: warm, inspect and maintain the thumbnail cache for a folder of
//! camera RAW files.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand, ValueEnum};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use loupe_codec::{Format, Thumbnail};
use loupe_config::{Settings, ThumbnailUse};
use loupe_library::ThumbnailService;
use loupe_library::batch::BatchEvent;
use loupe_library::error::{ErrorKind as LibraryErrorKind, Result as LibraryResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// JPEG quality of thumbnails written by `get --output`.
const OUTPUT_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Parser)]
#[command(name = "loupe", version, about = "Thumbnail cache and preview extraction for folders of camera RAW files")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Disk cache directory, overriding the configured one.
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate thumbnails for every eligible file in a directory.
    Warm {
        directory: PathBuf,
        #[arg(long, value_enum, default_value_t = Size::Grid)]
        size: Size,
    },
    /// Write the embedded preview of every eligible file next to it as a JPEG.
    Export {
        directory: PathBuf,
        /// Allow previews up to 8640 pixels instead of 4320.
        #[arg(long)]
        full_size: bool,
    },
    /// Produce the thumbnail for a single file.
    Get {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = Size::Grid)]
        size: Size,
        /// Write the thumbnail here; the format follows the extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show cache statistics.
    Stats,
    /// Remove disk cache entries older than the configured (or given) age.
    Prune {
        #[arg(long)]
        days: Option<u32>,
    },
    /// Empty the disk cache.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Size {
    Grid,
    GridView,
    Preview,
    FullSize,
}

impl From<Size> for ThumbnailUse {
    fn from(size: Size) -> Self {
        match size {
            Size::Grid => Self::Grid,
            Size::GridView => Self::GridView,
            Size::Preview => Self::Preview,
            Size::FullSize => Self::FullSize,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "loupe failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = match verbose {
        true => "debug",
        false => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Settings)?;
    if let Some(cache_dir) = cli.cache_dir {
        settings.cache_dir = Some(cache_dir);
    }
    let service = Arc::new(ThumbnailService::new(settings).or_raise(|| ErrorKind::Service)?);

    let interrupt = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; letting files already in flight finish");
                service.cancel_batch();
            }
        })
    };

    let result = match cli.command {
        Command::Warm { directory, size } => report(service.warm_events(&directory, size.into())).await,
        Command::Export { directory, full_size } => report(service.export_events(&directory, full_size)).await,
        Command::Get { file, size, output } => get(&service, &file, size.into(), output.as_deref()).await,
        Command::Stats => {
            stats(&service).await;
            Ok(())
        },
        Command::Prune { days } => {
            let removed = match days {
                Some(days) => service.prune_disk_cache_older_than(days).await,
                None => service.prune_disk_cache().await,
            };
            println!("Removed {removed} cached thumbnails");
            Ok(())
        },
        Command::Clear => {
            let removed = service.clear_caches().await;
            println!("Removed {removed} cached thumbnails");
            Ok(())
        },
    };

    interrupt.abort();
    service.shutdown().await;
    result
}

async fn report(events: impl Stream<Item = LibraryResult<BatchEvent>>) -> Result<()> {
    let mut events = std::pin::pin!(events);
    let mut failed = 0u64;
    while let Some(event) = events.next().await {
        match event {
            Ok(BatchEvent::Started) => {},
            Ok(BatchEvent::DiscoveryComplete(total)) => println!("Found {total} files"),
            Ok(BatchEvent::Processed { path, processed, total }) => {
                println!("[{processed}/{total}] {}", path.display());
            },
            Ok(BatchEvent::Estimate(remaining)) => println!("About {}s remaining", remaining.as_secs()),
            Ok(BatchEvent::Complete(succeeded)) => println!("Done: {succeeded} succeeded, {failed} failed"),
            Ok(BatchEvent::Cancelled(succeeded)) => println!("Cancelled: {succeeded} succeeded, {failed} failed"),
            Err(e) if matches!(&*e, LibraryErrorKind::Item(_)) => {
                failed += 1;
                tracing::warn!(error = ?e, "Skipping file");
            },
            Err(e) => return Err(e.raise(ErrorKind::Batch)),
        }
    }
    Ok(())
}

async fn get(service: &ThumbnailService, file: &Path, usage: ThumbnailUse, output: Option<&Path>) -> Result<()> {
    let resolved = service
        .resolve(file, service.target_size(usage))
        .await
        .or_raise(|| ErrorKind::Unavailable(file.to_path_buf()))?;
    println!("{}: {}x{} ({:?})", file.display(), resolved.width(), resolved.height(), resolved.origin());
    if let Some(output) = output {
        write_thumbnail(&resolved, output)?;
        println!("Wrote {}", output.display());
    }
    Ok(())
}

fn write_thumbnail(thumbnail: &Thumbnail, output: &Path) -> Result<()> {
    let format = Format::from_path(output).unwrap_or_default();
    let bytes = format.encode(thumbnail, OUTPUT_JPEG_QUALITY).or_raise(|| ErrorKind::Output(output.to_path_buf()))?;
    std::fs::write(output, bytes).or_raise(|| ErrorKind::Output(output.to_path_buf()))
}

async fn stats(service: &ThumbnailService) {
    let disk_bytes = service.disk_cache_size().await;
    let statistics = service.statistics();
    let settings = service.settings();
    println!("Memory budget:    {} MB ({} bytes in force)", settings.memory_cache_size_mb, statistics.cache.cost_limit);
    println!("Resident:         {} thumbnails, {} bytes", statistics.cache.resident_count, statistics.cache.resident_cost);
    println!(
        "Lookups:          {} hits, {} misses ({:.1}% hit rate), {} from disk",
        statistics.cache.hits, statistics.cache.misses, statistics.cache.hit_rate, statistics.cache.disk_hits
    );
    println!("Evictions:        {}", statistics.cache.evictions);
    println!("Decodes:          {} ({} coalesced)", statistics.resolver.decodes, statistics.resolver.coalesced);
    println!("Memory pressure:  {}", statistics.pressure.current);
    println!("Disk cache:       {disk_bytes} bytes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case(&["loupe", "warm", "/photos"], Size::Grid)]
    #[case(&["loupe", "warm", "/photos", "--size", "grid-view"], Size::GridView)]
    #[case(&["loupe", "-v", "warm", "--size", "full-size", "/photos"], Size::FullSize)]
    fn test_warm_size(#[case] args: &[&str], #[case] expected: Size) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Warm { directory, size } => {
                assert_eq!(directory, PathBuf::from("/photos"));
                assert_eq!(size, expected);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["loupe", "prune", "--days", "7", "--cache-dir", "/tmp/loupe", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/loupe")));
        assert!(matches!(cli.command, Command::Prune { days: Some(7) }));
    }

    #[test]
    fn test_write_thumbnail_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let thumbnail = Thumbnail::new(loupe_codec::RgbaImage::new(8, 6)).unwrap();
        for name in ["out.png", "out.jpg", "out.unknown"] {
            let output = dir.path().join(name);
            write_thumbnail(&thumbnail, &output).unwrap();
            let bytes = std::fs::read(&output).unwrap();
            let expected = Format::from_path(&output).unwrap_or_default();
            assert_eq!(Format::from_magic_bytes(&bytes), Some(expected));
        }
    }
}
