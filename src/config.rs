//! Command-line and environment configuration for the binaries.

use std::path::PathBuf;

use clap::Parser;

/// Analytics server configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "analytics_server", about = "On-demand influence analytics server")]
pub struct ServerConfig {
    /// Root directory for per-query archives.
    #[arg(long, env = "SWAY_ARCHIVE_ROOT", default_value = "archives")]
    pub archive_root: PathBuf,

    /// TCP port to listen on.
    #[arg(long, env = "SWAY_PORT", default_value_t = 1137)]
    pub port: u16,

    /// Queries slower than this many seconds get a SLOW audit line.
    #[arg(long, env = "SWAY_SLOW_QUERY_SECS", default_value_t = 60.0)]
    pub slow_query_secs: f64,

    /// User credential file (array of id/oauth_token/oauth_token_secret).
    #[arg(long, env = "SWAY_CREDENTIALS_FILE", default_value = "temp_tokens.json")]
    pub credentials_file: PathBuf,

    /// Query audit log for FAILED/SLOW lines.
    #[arg(long, env = "SWAY_QUERY_LOG", default_value = "logs/failed_queries.log")]
    pub query_log: PathBuf,

    /// Analysis worker slots; defaults to available parallelism.
    #[arg(long, env = "SWAY_WORKERS")]
    pub workers: Option<usize>,

    /// Ball radius for the ranking kernel.
    #[arg(long, default_value_t = 2)]
    pub radius: usize,

    /// Page budget per on-demand collection pass.
    #[arg(long, default_value_t = 60)]
    pub max_pages: u32,

    /// Default search language when a query has no lang filter.
    #[arg(long, default_value = "en")]
    pub lang: String,
}

/// Topic tracker configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "topic_tracker", about = "Long-running fair topic collector")]
pub struct TrackerConfig {
    /// File with one raw query per line; blank lines and #-comments skip.
    #[arg(long)]
    pub topics_file: PathBuf,

    /// Root directory for per-query archives.
    #[arg(long, env = "SWAY_ARCHIVE_ROOT", default_value = "archives")]
    pub archive_root: PathBuf,

    /// Higher evenness shortens each topic's slice of the rate window.
    #[arg(long, default_value_t = 1.0)]
    pub evenness: f64,

    /// Search language for every topic.
    #[arg(long, default_value = "en")]
    pub lang: String,
}
