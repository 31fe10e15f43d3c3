use std::path::Path;

use log::info;
use sqlx::sqlite::*;

pub mod crud;
pub mod model;

pub use model::*;

pub type Database = SqlitePool;

/// 初始化数据库连接并建表
pub async fn init_db(filename: impl AsRef<Path>) -> Result<Database, sqlx::Error> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    if let Some(parent) = filename.parent() {
        std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
    }

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .filename(filename)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options).await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        hash BLOB NOT NULL UNIQUE,
        path TEXT NOT NULL,
        kind TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_kind ON media(kind)",
    r#"
    CREATE TABLE IF NOT EXISTS job (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_name TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        finish_time INTEGER NOT NULL,
        processed_count INTEGER NOT NULL,
        is_success INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_name ON job(job_name)",
    r#"
    CREATE TABLE IF NOT EXISTS prototype (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        centroid BLOB NOT NULL,
        sample_count INTEGER NOT NULL,
        color TEXT NOT NULL,
        description TEXT,
        category TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sample (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        prototype_id INTEGER NOT NULL REFERENCES prototype(id) ON DELETE CASCADE,
        source_uri TEXT NOT NULL,
        crop_rect TEXT NOT NULL,
        embedding BLOB NOT NULL,
        added_at INTEGER NOT NULL,
        thumbnail_path TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sample_prototype ON sample(prototype_id)",
    r#"
    CREATE TABLE IF NOT EXISTS tag (
        name TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        embedding BLOB NOT NULL,
        threshold REAL NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_tag (
        media_id INTEGER NOT NULL,
        tag_name TEXT NOT NULL,
        confidence REAL NOT NULL,
        is_user_assigned INTEGER NOT NULL,
        PRIMARY KEY (media_id, tag_name, is_user_assigned)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_tag_media ON media_tag(media_id)",
];
