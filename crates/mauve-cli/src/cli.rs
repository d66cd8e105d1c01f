use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use mauve_node::AnalyticsConfig;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub cmd: OptsCmd,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the node's database file.
    #[arg(long, env = "MAUVE_DB_PATH", default_value = "mauve.redb")]
    pub db: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum OptsCmd {
    /// Run the node: request tracker plus periodic analytics cycles.
    Run {
        #[command(flatten)]
        config: ConfigOpts,
    },

    /// Run a single analytics cycle and exit.
    Analyze {
        #[command(flatten)]
        config: ConfigOpts,
    },

    /// Ingest line-delimited event JSON from a file.
    Ingest { file: PathBuf },

    /// Inspect stored analytics.
    #[command(subcommand)]
    Show(ShowCmd),
}

/// Analytics knobs worth exposing operationally; everything else keeps its
/// built-in default.
#[derive(Debug, Args)]
pub struct ConfigOpts {
    /// Trusted followers required for promotion into the trusted set.
    #[arg(long, env = "MAUVE_MIN_TRUSTED_FOLLOWERS", default_value = "1000")]
    pub min_trusted_followers: usize,

    /// Minimum members for a reported bot cluster.
    #[arg(long, env = "MAUVE_MIN_CLUSTER_SIZE", default_value = "5")]
    pub min_cluster_size: usize,

    /// Seconds between analytics cycles.
    #[arg(long, env = "MAUVE_CYCLE_INTERVAL_SECS", default_value = "21600")]
    pub cycle_interval_secs: u64,

    /// Seconds between request-counter flushes.
    #[arg(long, env = "MAUVE_FLUSH_INTERVAL_SECS", default_value = "30")]
    pub flush_interval_secs: u64,
}

impl ConfigOpts {
    pub fn to_config(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            min_trusted_followers: self.min_trusted_followers,
            min_cluster_size: self.min_cluster_size,
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ShowCmd {
    /// The persisted trusted set.
    Trust {
        #[clap(long, default_value = "50")]
        limit: usize,
    },
    /// Active bot clusters.
    Clusters {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// The community snapshot.
    Communities,
    /// Most-requested pubkeys.
    TopRequested {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// Most frequent filter co-occurrences.
    Cooccurrences {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// Spam candidates from the last trust cycle.
    Spam {
        #[clap(long, default_value = "50")]
        limit: usize,
    },
    /// Archived versions for one pubkey.
    History {
        pubkey: String,
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// The global change feed.
    Changes {
        #[clap(long, default_value = "0")]
        offset: usize,
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// Archive and trust aggregates.
    Stats,
}
