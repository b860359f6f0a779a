use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Network image fetcher with a rule-driven disk cache",
    long_about = "Downloads images over HTTP with retries and exponential backoff, and keeps\n\
                  them in a namespaced disk cache bounded by entry count, total size and age.\n\
                  Repeated fetches of the same URL are served from the cache."
)]
pub struct CliArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, help = "Append log output to the given file")]
    pub log_file: Option<PathBuf>,

    /// Disk cache base directory
    #[arg(
        long,
        global = true,
        help = "Base directory of the disk cache (default: <system temp>/imgfetch-cache)"
    )]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch an image, from the cache when possible
    Fetch(FetchArgs),

    /// Remove cached images
    Clear {
        #[arg(short, long, help = "Only clear this namespace")]
        namespace: Option<String>,
    },

    /// Show entry counts and sizes
    Stats {
        #[arg(short, long, help = "Only report this namespace")]
        namespace: Option<String>,
    },

    /// Remove images not used within a time window
    Prune {
        #[arg(
            long,
            help = "Remove entries not accessed within this window (s, m, h, d). Example: \"7d\""
        )]
        older_than: String,

        #[arg(short, long, help = "Only prune this namespace")]
        namespace: Option<String>,
    },
}

#[derive(Args)]
pub struct FetchArgs {
    /// URL of the image
    #[arg(required = true, help = "URL of the image to fetch")]
    pub url: String,

    /// Where to write the image bytes
    #[arg(short, long, help = "Write the image to this file")]
    pub output: Option<PathBuf>,

    #[arg(
        short,
        long,
        default_value = "default",
        help = "Cache namespace (a subdirectory of the cache directory)"
    )]
    pub namespace: String,

    #[arg(long, help = "Maximum number of entries kept in the namespace")]
    pub max_count: Option<usize>,

    #[arg(
        long,
        help = "Maximum total size of the namespace with optional unit (B, KB, MB, GB). Example: \"200MB\""
    )]
    pub max_size: Option<String>,

    #[arg(
        long,
        help = "Maximum age of an entry with optional unit (s, m, h, d). Example: \"30d\""
    )]
    pub max_age: Option<String>,

    #[arg(long, help = "Bypass the disk cache entirely")]
    pub no_cache: bool,

    #[arg(long, help = "Cache key to use instead of the URL")]
    pub cache_key: Option<String>,

    #[arg(
        short = 'r',
        long,
        default_value = "5",
        help = "Number of retries after the first attempt"
    )]
    pub retries: u32,

    #[arg(
        long,
        default_value = "500",
        help = "Delay before the first retry in milliseconds"
    )]
    pub retry_delay: u64,

    #[arg(
        long,
        default_value = "1.5",
        help = "Multiplier applied to the retry delay after each retry"
    )]
    pub retry_factor: f64,

    #[arg(
        short,
        long,
        default_value = "5",
        help = "Timeout of a single attempt in seconds"
    )]
    pub timeout: u64,

    #[arg(
        long = "skip-status",
        value_delimiter = ',',
        help = "HTTP status codes that fail immediately without retry. Example: 403,404"
    )]
    pub skip_status: Vec<u16>,

    #[arg(
        short = 'H',
        long = "header",
        help = "Add a request header (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    #[arg(short, long, help = "Show a download progress bar")]
    pub progress: bool,
}
