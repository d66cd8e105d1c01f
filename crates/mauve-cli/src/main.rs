mod cli;

use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::{Opts, OptsCmd, ShowCmd};
use mauve_core::{Event, Pubkey};
use mauve_db::{Database, DbError};
use mauve_node::Node;
use mauve_util_error::FmtCompact as _;
use snafu::{FromString, ResultExt, Snafu, Whatever};
use tracing::{info, warn};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "mauve::cli";

type WhateverResult<T> = std::result::Result<T, snafu::Whatever>;

#[derive(Debug, Snafu)]
pub enum CliError {
    #[snafu(display("Database error: {source}"))]
    Db { source: DbError },
    #[snafu(display("I/O error: {source}"))]
    Io { source: io::Error },
    #[snafu(display("Miscellaneous error: {source}"))]
    Whatever { source: Whatever },
}

pub type CliResult<T> = std::result::Result<T, CliError>;

#[snafu::report]
#[tokio::main]
async fn main() -> CliResult<()> {
    init_logging().context(WhateverSnafu)?;

    let opts = Opts::parse();
    match handle_cmd(opts).await {
        Ok(v) => {
            println!("{}", serde_json::to_string_pretty(&v).expect("Can't fail"));
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn handle_cmd(opts: Opts) -> CliResult<serde_json::Value> {
    let db = Arc::new(Database::open(&opts.global.db).await.context(DbSnafu)?);

    match opts.cmd {
        OptsCmd::Run { config } => {
            let node = Node::builder(db).config(config.to_config()).build().await;

            info!(target: LOG_TARGET, "Node running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context(IoSnafu)?;

            node.shutdown().await;
            Ok(serde_json::json!({
                "trusted": node.trusted_count().await,
            }))
        }
        OptsCmd::Analyze { config } => {
            let node = Node::builder(db)
                .config(config.to_config())
                .start_background_tasks(false)
                .build()
                .await;

            node.run_analytics_cycle().await;

            Ok(serde_json::json!({
                "trusted": node.trusted_count().await,
                "clusters": node.bot_clusters(usize::MAX).await.len(),
                "communities": node
                    .communities()
                    .await
                    .map(|c| c.communities.len())
                    .unwrap_or(0),
            }))
        }
        OptsCmd::Ingest { file } => {
            let content = tokio::fs::read_to_string(&file).await.context(IoSnafu)?;

            let mut inserted = 0u64;
            let mut stale = 0u64;
            let mut invalid = 0u64;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = match serde_json::from_str(line) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(
                            target: LOG_TARGET,
                            err = %err.fmt_compact(),
                            line = line_no + 1,
                            "Skipping malformed event"
                        );
                        invalid += 1;
                        continue;
                    }
                };
                if db.process_event(&event).await.context(DbSnafu)?.is_inserted() {
                    inserted += 1;
                } else {
                    stale += 1;
                }
            }

            Ok(serde_json::json!({
                "inserted": inserted,
                "stale": stale,
                "invalid": invalid,
            }))
        }
        OptsCmd::Show(cmd) => handle_show(&db, cmd).await,
    }
}

async fn handle_show(db: &Database, cmd: ShowCmd) -> CliResult<serde_json::Value> {
    let value = match cmd {
        ShowCmd::Trust { limit } => {
            let mut trusted: Vec<Pubkey> =
                db.get_trusted_pubkeys().await.context(DbSnafu)?.into_iter().collect();
            trusted.sort_unstable();
            trusted.truncate(limit);
            serde_json::to_value(trusted)
        }
        ShowCmd::Clusters { limit } => {
            serde_json::to_value(db.get_bot_clusters(limit).await.context(DbSnafu)?)
        }
        ShowCmd::Communities => {
            serde_json::to_value(db.get_communities().await.context(DbSnafu)?)
        }
        ShowCmd::TopRequested { limit } => {
            serde_json::to_value(db.get_top_requested(limit).await.context(DbSnafu)?)
        }
        ShowCmd::Cooccurrences { limit } => {
            serde_json::to_value(db.get_top_cooccurrences(limit).await.context(DbSnafu)?)
        }
        ShowCmd::Spam { limit } => {
            serde_json::to_value(db.get_spam_candidates(limit).await.context(DbSnafu)?)
        }
        ShowCmd::History { pubkey, limit } => serde_json::to_value(
            db.event_history(&Pubkey::new(pubkey), limit)
                .await
                .context(DbSnafu)?,
        ),
        ShowCmd::Changes { offset, limit } => {
            serde_json::to_value(db.recent_changes(offset, limit).await.context(DbSnafu)?)
        }
        ShowCmd::Stats => {
            let history = db.event_history_stats().await.context(DbSnafu)?;
            let trusted = db.get_trusted_pubkeys().await.context(DbSnafu)?.len();
            serde_json::to_value(serde_json::json!({
                "history": history,
                "trusted": trusted,
            }))
        }
    };

    Ok(value.expect("Can't fail"))
}

pub fn init_logging() -> WhateverResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| Whatever::without_source("Failed to initialize logging".to_string()))?;

    Ok(())
}
