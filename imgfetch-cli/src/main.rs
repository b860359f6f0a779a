use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use error::AppError;
use imgfetch_engine::{
    CacheRule, DiskCache, FetchConfig, ImageLoader, LoadHooks, LoadRequest, LoadSource,
    RetryPolicy,
};
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod utils;

use cli::{CliArgs, Command, FetchArgs};
use utils::progress::DownloadProgress;
use utils::{format_bytes, parse_duration, parse_headers, parse_size};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();
    init_logging(&args)?;

    let mut builder = FetchConfig::builder();
    if let Some(dir) = &args.cache_dir {
        builder = builder.with_cache_dir(dir);
    }
    let config = builder.build();
    info!(cache_dir = %config.cache_dir().display(), "Using disk cache");

    match args.command {
        Command::Fetch(fetch_args) => fetch(config, fetch_args).await,
        Command::Clear { namespace } => {
            let cache = DiskCache::new(config.cache_dir());
            cache.clear(namespace.as_deref()).await?;
            info!(namespace = ?namespace, "Cache cleared");
            Ok(())
        }
        Command::Stats { namespace } => {
            stats(&DiskCache::new(config.cache_dir()), namespace).await
        }
        Command::Prune {
            older_than,
            namespace,
        } => {
            let window = parse_duration(&older_than)?;
            let cache = DiskCache::new(config.cache_dir());
            let removed = cache.clear_older_than(window, namespace.as_deref()).await?;
            info!(removed, "Pruned entries not accessed within {older_than}");
            Ok(())
        }
    }
}

fn init_logging(args: &CliArgs) -> Result<(), AppError> {
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(args.log_file.is_none());

    let result = match &args.log_file {
        Some(path) => {
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let multi_writer = MakeWriterExt::and(std::io::stderr, log_file);
            tracing::subscriber::set_global_default(builder.with_writer(multi_writer).finish())
        }
        None => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        ),
    };

    result.map_err(|e| AppError::Initialization(e.to_string()))
}

fn cache_rule(args: &FetchArgs) -> Result<Option<CacheRule>, AppError> {
    if args.no_cache {
        return Ok(None);
    }

    let mut rule = CacheRule::new(&args.namespace);
    if let Some(max_count) = args.max_count {
        rule = rule.with_max_count(max_count);
    }
    if let Some(max_size) = &args.max_size {
        rule = rule.with_max_size(parse_size(max_size)?);
    }
    if let Some(max_age) = &args.max_age {
        rule = rule.with_max_age(parse_duration(max_age)?);
    }
    Ok(Some(rule))
}

async fn fetch(config: FetchConfig, args: FetchArgs) -> Result<(), AppError> {
    if !args.retry_factor.is_finite() {
        return Err(AppError::InvalidInput(format!(
            "retry factor must be a finite number, got {}",
            args.retry_factor
        )));
    }

    let loader = ImageLoader::new(&config)?;
    let retry = RetryPolicy::default()
        .with_retry_limit(args.retries)
        .with_initial_delay(Duration::from_millis(args.retry_delay))
        .with_backoff_factor(args.retry_factor)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_skip_status_codes(args.skip_status.iter().copied());

    let progress = args.progress.then(|| Arc::new(DownloadProgress::new(&args.url)));
    let mut hooks = LoadHooks::default();
    if let Some(progress) = &progress {
        hooks = hooks.with_progress(progress.clone());
    }

    let mut request = LoadRequest::new(&args.url)
        .with_headers(parse_headers(&args.headers))
        .with_retry(retry)
        .with_hooks(hooks);
    request.cache_rule = cache_rule(&args)?;
    if let Some(key) = &args.cache_key {
        request = request.with_cache_key(key);
    }

    // Ctrl+C cancels the load
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling download");
                cancel.cancel();
            }
        });
    }

    let image = match loader.load(&request, &cancel).await {
        Ok(image) => image,
        Err(e) => {
            if let Some(progress) = &progress {
                progress.abandon();
            }
            return Err(e.into());
        }
    };

    if let Some(progress) = &progress {
        progress.finish(format!("Downloaded {}", format_bytes(image.bytes.len() as u64)));
    }

    let source = match image.source {
        LoadSource::Memory => "memory",
        LoadSource::DiskCache => "disk cache",
        LoadSource::Network => "network",
    };
    info!(
        id = %image.id,
        size = %format_bytes(image.bytes.len() as u64),
        source,
        "Image loaded"
    );

    if let Some(output) = &args.output {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, &image.bytes).await?;
        info!(path = %output.display(), "Image written");
    } else if let Some(path) = loader.cached_path(&request).await {
        info!(path = %path.display(), "Image available in cache");
    }

    Ok(())
}

async fn stats(cache: &DiskCache, namespace: Option<String>) -> Result<(), AppError> {
    let namespaces = match namespace {
        Some(ns) => vec![ns],
        None => cache.namespaces().await?,
    };

    if namespaces.is_empty() {
        info!("Cache is empty");
        return Ok(());
    }

    let mut total_entries = 0;
    let mut total_size = 0;
    for ns in &namespaces {
        let entries = cache.entries(ns).await?;
        let size: u64 = entries.iter().map(|entry| entry.size).sum();
        info!(
            namespace = %ns,
            entries = entries.len(),
            size = %format_bytes(size),
            "Namespace stats"
        );
        total_entries += entries.len();
        total_size += size;
    }

    info!(
        namespaces = namespaces.len(),
        entries = total_entries,
        size = %format_bytes(total_size),
        "Cache totals"
    );
    Ok(())
}
