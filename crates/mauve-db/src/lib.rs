mod analytics_ops;
mod event_ops;
mod history_ops;
mod social_ops;
mod tables;

use std::path::PathBuf;

use mauve_util_error::BoxedError;
use snafu::{Location, ResultExt as _, Snafu};
use tokio::task::JoinError;
use tracing::debug;

pub use self::analytics_ops::TopCooccurrence;
pub use self::event_ops::InsertEventOutcome;
pub use self::history_ops::{EventHistoryStats, RecentChange};
pub use self::tables::*;

const LOG_TARGET: &str = "mauve::db";

/// Bump when the table layout changes incompatibly.
const DB_VERSION: u64 = 0;

#[derive(Debug, Snafu)]
pub enum DbError {
    Database {
        source: redb::DatabaseError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Table {
        source: redb::TableError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    Storage {
        source: redb::StorageError,
        #[snafu(implicit)]
        location: Location,
    },
    Transaction {
        #[snafu(source(from(redb::TransactionError, Box::new)))]
        source: Box<redb::TransactionError>,
        #[snafu(implicit)]
        location: Location,
    },
    Commit {
        source: redb::CommitError,
        #[snafu(implicit)]
        location: Location,
    },
    DbVersionTooHigh {
        db_ver: u64,
        code_ver: u64,
        #[snafu(implicit)]
        location: Location,
    },
    Join {
        source: JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(transparent)]
    DbTxLogic {
        source: BoxedError,
        #[snafu(implicit)]
        location: Location,
    },
}
pub type DbResult<T> = std::result::Result<T, DbError>;

/// The typed storage boundary the relay and the analytics pipeline share.
///
/// All public operations are `async` and tolerate being called concurrently;
/// writes serialize on redb's single write transaction.
#[derive(Debug)]
pub struct Database {
    inner: redb_bincode::Database,

    /// Monotonically increasing counter for strict ordering of archived
    /// event versions landing within the same second.
    reception_order_counter: std::sync::atomic::AtomicU64,
}

impl Database {
    pub async fn open(path: impl Into<PathBuf>) -> DbResult<Database> {
        let path = path.into();
        debug!(target: LOG_TARGET, path = %path.display(), "Opening database");

        let inner = tokio::task::spawn_blocking(move || redb::Database::create(path))
            .await
            .context(JoinSnafu)?
            .context(DatabaseSnafu)?;

        Self::open_inner(inner).await
    }

    pub async fn new_in_memory() -> DbResult<Database> {
        debug!(target: LOG_TARGET, "Opening in-memory database");
        let inner = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(DatabaseSnafu)?;
        Self::open_inner(inner).await
    }

    async fn open_inner(inner: redb::Database) -> DbResult<Database> {
        let inner = redb_bincode::Database::from(inner);

        Self::write_with_inner(&inner, |tx| {
            Self::init_tables_tx(tx)?;
            Self::verify_db_version_tx(&mut tx.open_table(&db_version::TABLE)?)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            inner,
            reception_order_counter: std::sync::atomic::AtomicU64::new(0),
        })
    }

    fn init_tables_tx(tx: &redb_bincode::WriteTransaction) -> DbResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&events::TABLE)?;
        tx.open_table(&events_by_kind::TABLE)?;
        tx.open_table(&event_history::TABLE)?;
        tx.open_table(&event_history_by_time::TABLE)?;
        tx.open_table(&profiles::TABLE)?;
        tx.open_table(&followers::TABLE)?;
        tx.open_table(&follower_counts::TABLE)?;
        tx.open_table(&bot_clusters::TABLE)?;
        tx.open_table(&communities::TABLE)?;
        tx.open_table(&trusted_pubkeys::TABLE)?;
        tx.open_table(&spam_candidates::TABLE)?;
        tx.open_table(&req_analytics::TABLE)?;
        tx.open_table(&req_pairs::TABLE)?;
        Ok(())
    }

    fn verify_db_version_tx(db_version_table: &mut db_version::Table) -> DbResult<()> {
        let existing_ver = db_version_table.get(&())?.map(|g| g.value());
        let db_ver = match existing_ver {
            Some(ver) => ver,
            None => {
                db_version_table.insert(&(), &DB_VERSION)?;
                DB_VERSION
            }
        };

        if DB_VERSION < db_ver {
            return DbVersionTooHighSnafu {
                db_ver,
                code_ver: DB_VERSION,
            }
            .fail();
        }

        Ok(())
    }

    pub(crate) fn next_reception_order(&self) -> u64 {
        self.reception_order_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    pub async fn write_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ redb_bincode::WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = inner.begin_write().context(TransactionSnafu)?;
            let res = f(&dbtx)?;

            dbtx.commit().context(CommitSnafu)?;

            Ok(res)
        })
    }

    pub async fn write_with<T>(
        &self,
        f: impl FnOnce(&'_ redb_bincode::WriteTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::write_with_inner(&self.inner, f).await
    }

    pub async fn read_with_inner<T>(
        inner: &redb_bincode::Database,
        f: impl FnOnce(&'_ redb_bincode::ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        tokio::task::block_in_place(|| {
            let dbtx = inner.begin_read().context(TransactionSnafu)?;

            f(&dbtx)
        })
    }

    pub async fn read_with<T>(
        &self,
        f: impl FnOnce(&'_ redb_bincode::ReadTransaction) -> DbResult<T>,
    ) -> DbResult<T> {
        Self::read_with_inner(&self.inner, f).await
    }
}
