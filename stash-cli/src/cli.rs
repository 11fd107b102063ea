use clap::Parser;
use std::path::PathBuf;

/// Command line of the `stash` binary
#[derive(Parser)]
#[command(
    version,
    about = "Fetch URLs through a quota-bounded local cache",
    long_about = "Downloads each URL into a local cache directory and prints the path of the\n\
                  cached file. Resources already in the cache are served without touching the\n\
                  network. The cache never grows beyond its quota: the least recently used\n\
                  entries are evicted to make room for new ones."
)]
pub struct CliArgs {
    /// URLs to fetch
    #[arg(
        required_unless_present_any = ["clear", "list"],
        help = "URL(s) to fetch through the cache"
    )]
    pub urls: Vec<String>,

    /// Cache directory
    #[arg(
        short,
        long,
        help = "Directory holding the cache (default: <temp dir>/stash-cache)"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Maximum cache size with optional unit (B, KB, MB, GB, TB)
    #[arg(
        short,
        long,
        default_value = "1GB",
        help = "Maximum total size of cached files with optional unit (B, KB, MB, GB, TB). Use 0 to disable caching."
    )]
    pub quota: String,

    /// Number of concurrent downloads
    #[arg(
        short = 'j',
        long,
        default_value = "4",
        help = "Maximum number of URLs fetched concurrently"
    )]
    pub jobs: usize,

    /// Overall timeout in seconds
    #[arg(
        long,
        default_value = "0",
        help = "Overall timeout in seconds for HTTP requests (0 for none)"
    )]
    pub timeout: u64,

    /// TCP + TLS handshake limit in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Seconds allowed to establish a connection"
    )]
    pub connect_timeout: u64,

    /// Idle timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Idle timeout in seconds for pooled connections"
    )]
    pub read_timeout: u64,

    /// Download chunk size
    #[arg(
        long,
        default_value = "16384",
        help = "Size in bytes of each read from the response body"
    )]
    pub chunk_size: usize,

    /// Extra request headers
    #[arg(
        long = "header",
        short = 'H',
        help = "Extra request header as 'Name: Value'; repeatable",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    /// Ignore proxy environment variables
    #[arg(
        long,
        help = "Connect directly, ignoring HTTP_PROXY and friends"
    )]
    pub no_proxy: bool,

    /// Remove every cached entry before fetching
    #[arg(long, help = "Remove every cached entry before fetching")]
    pub clear: bool,

    /// List cached entries
    #[arg(short, long, help = "List cached entries, least recently used first")]
    pub list: bool,

    /// Per-URL progress bars
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show progress bars for downloads"
    )]
    pub show_progress: bool,

    #[arg(short, long, help = "Log at debug level")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, help = "Duplicate log output into this file")]
    pub log_file: Option<PathBuf>,
}
