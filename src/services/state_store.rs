//! src/services/state_store.rs
//!
//! StateStore: the provisioner's memory. Every managed resource is one row
//! in SQLite holding its attributes as JSON. A header row carries the state
//! `lineage` (fixed when the file is created) and a `serial` bumped on every
//! write, so two snapshots of the same state can be ordered.

use crate::models::{
    bucket::{BUCKET_ADDRESS, BUCKET_KIND, Bucket},
    random_suffix::{RandomSuffix, SUFFIX_ADDRESS, SUFFIX_KIND},
};
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use sqlx::{
    SqlitePool,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{io, str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state entry `{address}` is unreadable: {source}")]
    Corrupt {
        address: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("state entry `{address}` could not be encoded: {source}")]
    Encode {
        address: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Migrate(#[from] MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StateResult<T> = Result<T, StateError>;

/// SQLite-backed provisioning state.
#[derive(Clone)]
pub struct StateStore {
    pub db: Arc<SqlitePool>,
}

impl StateStore {
    /// Open (or create) the state database at `url` and bring its schema up
    /// to date.
    pub async fn open(url: &str) -> StateResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                debug!("created state directory {}", parent.display());
            }
        }

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&db).await?;

        sqlx::query("INSERT OR IGNORE INTO state_meta (id, lineage, serial) VALUES (1, ?, 0)")
            .bind(Uuid::new_v4().to_string())
            .execute(&db)
            .await?;

        Ok(Self { db: Arc::new(db) })
    }

    pub async fn suffix(&self) -> StateResult<Option<RandomSuffix>> {
        self.get(SUFFIX_ADDRESS).await
    }

    pub async fn put_suffix(&self, suffix: &RandomSuffix) -> StateResult<()> {
        self.put(SUFFIX_ADDRESS, SUFFIX_KIND, suffix).await
    }

    pub async fn bucket(&self) -> StateResult<Option<Bucket>> {
        self.get(BUCKET_ADDRESS).await
    }

    pub async fn put_bucket(&self, bucket: &Bucket) -> StateResult<()> {
        self.put(BUCKET_ADDRESS, BUCKET_KIND, bucket).await
    }

    /// Forget a resource. Returns false when nothing was recorded under
    /// `address`.
    pub async fn remove(&self, address: &str) -> StateResult<bool> {
        let mut tx = self.db.begin().await?;
        let result = sqlx::query("DELETE FROM resources WHERE address = ?")
            .bind(address)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        bump_serial(&mut tx).await?;
        tx.commit().await?;
        debug!("removed {} from state", address);
        Ok(true)
    }

    /// Addresses of every recorded resource, sorted.
    pub async fn addresses(&self) -> StateResult<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT address FROM resources ORDER BY address")
                .fetch_all(&*self.db)
                .await?,
        )
    }

    pub async fn serial(&self) -> StateResult<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT serial FROM state_meta WHERE id = 1")
                .fetch_one(&*self.db)
                .await?,
        )
    }

    pub async fn lineage(&self) -> StateResult<String> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT lineage FROM state_meta WHERE id = 1")
                .fetch_one(&*self.db)
                .await?,
        )
    }

    async fn get<T: DeserializeOwned>(&self, address: &str) -> StateResult<Option<T>> {
        let raw = sqlx::query_scalar::<_, String>(
            "SELECT attributes FROM resources WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&*self.db)
        .await?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|source| StateError::Corrupt {
                address: address.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn put<T: Serialize>(&self, address: &str, kind: &str, value: &T) -> StateResult<()> {
        let json = serde_json::to_string(value).map_err(|source| StateError::Encode {
            address: address.to_string(),
            source,
        })?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO resources (address, kind, attributes, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                kind = excluded.kind,
                attributes = excluded.attributes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(address)
        .bind(kind)
        .bind(&json)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        bump_serial(&mut tx).await?;
        tx.commit().await?;

        debug!("recorded {} in state", address);
        Ok(())
    }
}

async fn bump_serial(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> StateResult<()> {
    sqlx::query("UPDATE state_meta SET serial = serial + 1 WHERE id = 1")
        .execute(&mut **tx)
        .await?;
    Ok(())
}
