//! SQLite pool setup and additive, version-tagged migrations.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::StoreResult;

/// Ordered list of schema migrations. Entries are append-only.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        id              TEXT PRIMARY KEY,
        principal_id    TEXT NOT NULL,
        filename        TEXT NOT NULL,
        size            INTEGER NOT NULL,
        declared_type   TEXT NOT NULL,
        chunk_size      INTEGER NOT NULL,
        total_chunks    INTEGER NOT NULL,
        received_bitmap BLOB NOT NULL,
        expires_at      TEXT NOT NULL,
        created_at      TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS blobs (
        id           TEXT PRIMARY KEY,
        size         INTEGER NOT NULL,
        content_type TEXT NOT NULL,
        created_at   TEXT NOT NULL,
        refcount     INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS jobs (
        id               TEXT PRIMARY KEY,
        principal_id     TEXT NOT NULL,
        job_type         TEXT NOT NULL,
        input_blob_id    TEXT NOT NULL,
        options_json     TEXT NOT NULL,
        status           TEXT NOT NULL,
        phase            TEXT,
        percent          INTEGER NOT NULL DEFAULT 0,
        description      TEXT NOT NULL DEFAULT '',
        error_json       TEXT,
        results_json     TEXT,
        attempts         INTEGER NOT NULL DEFAULT 0,
        queue_class      TEXT NOT NULL DEFAULT 'batch',
        worker_lease     TEXT,
        lease_expires_at TEXT,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL,
        started_at       TEXT,
        finished_at      TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_principal ON jobs(principal_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

    CREATE TABLE IF NOT EXISTS transcripts (
        job_id        TEXT PRIMARY KEY,
        segments_json TEXT NOT NULL,
        created_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS artifacts (
        id               TEXT PRIMARY KEY,
        job_id           TEXT NOT NULL,
        ordinal          INTEGER NOT NULL,
        blob_id          TEXT NOT NULL,
        duration         REAL NOT NULL,
        source_start     REAL NOT NULL,
        source_end       REAL NOT NULL,
        aspect_ratio     TEXT NOT NULL,
        captions_added   INTEGER NOT NULL,
        viral_score      REAL NOT NULL,
        caption_track_id TEXT,
        UNIQUE(job_id, ordinal)
    );
    CREATE INDEX IF NOT EXISTS idx_artifacts_job ON artifacts(job_id, ordinal);
    "#,
)];

/// Open the connection pool for the configured database file.
pub async fn connect(config: &StoreConfig) -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(config.database_path())
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Apply any migrations newer than the recorded schema version.
pub async fn migrate(pool: &SqlitePool) -> StoreResult<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version, "applied schema migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::rooted_at(dir.path());
        let pool = connect(&config).await.unwrap();

        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, 1);
    }
}
