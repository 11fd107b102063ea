use std::{sync::Arc, time::Duration};

use clap::Parser;
use error::AppError;
use futures::{StreamExt, stream};
use indicatif::MultiProgress;
use stash_engine::{
    AtomicDownloader, CacheConfig, CachedFetcher, DownloaderConfig, HttpTransport,
};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;
use utils::{format_bytes, parse_headers, parse_size};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // stdout carries the fetched paths, so logs go to stderr
    let result = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(MakeWriterExt::and(
                    std::io::stderr,
                    std::sync::Mutex::new(log_file),
                ))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };

    result.map_err(|e| AppError::Initialization(e.to_string()))
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    init_logging(&args)?;

    let quota = parse_size(&args.quota)?;
    if args.jobs == 0 {
        return Err(AppError::InvalidInput("--jobs must be at least 1".to_string()));
    }
    if args.chunk_size == 0 {
        return Err(AppError::InvalidInput(
            "--chunk-size must be at least 1".to_string(),
        ));
    }

    let cache_config = match &args.cache_dir {
        Some(dir) => CacheConfig::new(dir, quota),
        None => CacheConfig {
            quota,
            ..CacheConfig::default()
        },
    };
    if cache_config.is_enabled() {
        info!(
            "Cache at {} with quota {}",
            cache_config.cache_dir.display(),
            format_bytes(quota)
        );
    } else {
        info!("Quota is zero, caching disabled");
    }

    debug!(
        "HTTP timeout configuration: overall={}s, connect={}s, read={}s",
        args.timeout, args.connect_timeout, args.read_timeout
    );
    if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
    }

    let mut headers = DownloaderConfig::get_default_headers();
    headers.extend(parse_headers(&args.headers));

    let download_config = DownloaderConfig::builder()
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_headers(headers)
        .with_system_proxy(!args.no_proxy)
        .with_chunk_size(args.chunk_size)
        .build();

    let multi = MultiProgress::new();
    let progress_manager = if args.show_progress {
        ProgressManager::new(multi)
    } else {
        ProgressManager::new_disabled(multi)
    };

    let transport = HttpTransport::new(&download_config)?;
    let mut downloader =
        AtomicDownloader::new(Arc::new(transport)).with_chunk_size(download_config.chunk_size);
    if !progress_manager.is_disabled() {
        downloader = downloader.with_progress(progress_manager.callback());
    }

    let cache = Arc::new(CachedFetcher::with_downloader(cache_config, downloader).await?);

    if args.clear {
        let removed = cache.clear().await?;
        info!("Removed {removed} cached entries");
    }

    if args.list {
        for entry in cache.entries().await {
            println!(
                "{}\t{}\t{}",
                entry.key.file_name(),
                format_bytes(entry.size),
                entry.path.display()
            );
        }
    }

    if args.urls.is_empty() {
        return Ok(());
    }

    let total = args.urls.len();
    let mut results: Vec<_> = stream::iter(args.urls.iter().cloned().enumerate())
        .map(|(position, url)| {
            let cache = cache.clone();
            let progress = progress_manager.clone();
            async move {
                let result = cache.get_url(&url).await;
                progress.finish(&url);
                (position, url, result)
            }
        })
        .buffer_unordered(args.jobs)
        .collect()
        .await;
    results.sort_by_key(|(position, _, _)| *position);

    let mut failed = 0;
    for (_, url, result) in results {
        match result {
            Ok(path) => println!("{}\t{url}", path.display()),
            Err(e) => {
                failed += 1;
                if e.is_fatal() {
                    error!(url = %url, error = %e, "Cache is inconsistent");
                } else {
                    warn!(url = %url, error = %e, "Fetch failed");
                }
            }
        }
    }

    let stats = cache.stats().await;
    info!(
        "{} hits, {} misses, {} evictions; {} entries using {} of {}",
        stats.hits,
        stats.misses,
        stats.evictions,
        stats.entries,
        format_bytes(stats.total_size),
        format_bytes(stats.quota)
    );

    if failed > 0 {
        return Err(AppError::Fetch { failed, total });
    }
    Ok(())
}
