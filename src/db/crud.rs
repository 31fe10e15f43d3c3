use sqlx::{Result, Row, Sqlite, SqlitePool, Transaction};

use super::{JobRecord, MediaTagAssignment, PrototypeRecord, SampleRecord, TagRecord};
use crate::utils::{blob_to_vec, vec_to_blob};

// ---------- media ----------

/// 添加媒体记录
pub async fn add_media(pool: &SqlitePool, hash: &[u8], path: &str, kind: &str) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO media (hash, path, kind)
        VALUES (?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(hash)
    .bind(path)
    .bind(kind)
    .fetch_one(pool)
    .await?;

    Ok(row.get(0))
}

/// 检查媒体哈希是否存在
pub async fn check_media_hash(pool: &SqlitePool, hash: &[u8]) -> Result<bool> {
    let row = sqlx::query("SELECT COUNT(*) FROM media WHERE hash = ?")
        .bind(hash)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>(0) > 0)
}

/// 按 ID 顺序获取某类媒体的全部 ID
pub async fn media_ids(pool: &SqlitePool, kind: &str) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT id FROM media WHERE kind = ? ORDER BY id ASC")
        .bind(kind)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|row| row.get(0)).collect())
}

/// 获取某类媒体的 (ID, 路径) 列表
pub async fn media_paths(pool: &SqlitePool, kind: &str) -> Result<Vec<(i64, String)>> {
    let rows = sqlx::query("SELECT id, path FROM media WHERE kind = ? ORDER BY id ASC")
        .bind(kind)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|row| (row.get(0), row.get(1))).collect())
}

pub async fn get_media_path(pool: &SqlitePool, id: i64) -> Result<Option<String>> {
    let row = sqlx::query("SELECT path FROM media WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get(0)))
}

pub async fn count_media(pool: &SqlitePool, kind: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM media WHERE kind = ?")
        .bind(kind)
        .fetch_one(pool)
        .await?;
    Ok(row.get(0))
}

// ---------- job ----------

/// 插入一条任务运行记录
pub async fn add_job(pool: &SqlitePool, record: &JobRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO job (job_name, start_time, finish_time, processed_count, is_success)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.job_name)
    .bind(record.start_time)
    .bind(record.finish_time)
    .bind(record.processed_count)
    .bind(record.is_success)
    .execute(pool)
    .await?;
    Ok(())
}

/// 同名任务的全部运行记录，按插入顺序
pub async fn list_jobs(pool: &SqlitePool, job_name: &str) -> Result<Vec<JobRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT job_name, start_time, finish_time, processed_count, is_success
        FROM job WHERE job_name = ? ORDER BY id ASC
        "#,
    )
    .bind(job_name)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| JobRecord {
            job_name: row.get(0),
            start_time: row.get(1),
            finish_time: row.get(2),
            processed_count: row.get(3),
            is_success: row.get(4),
        })
        .collect())
}

/// 同名任务历史运行处理数量的总和
pub async fn jobs_processed_total(pool: &SqlitePool, job_name: &str) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(processed_count), 0) FROM job WHERE job_name = ?",
    )
    .bind(job_name)
    .fetch_one(pool)
    .await?;
    Ok(row.get(0))
}

/// 同名任务成功运行的次数
pub async fn jobs_success_count(pool: &SqlitePool, job_name: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) FROM job WHERE job_name = ? AND is_success = 1")
        .bind(job_name)
        .fetch_one(pool)
        .await?;
    Ok(row.get(0))
}

/// 清空同名任务的全部运行记录
pub async fn clear_jobs(pool: &SqlitePool, job_name: &str) -> Result<()> {
    sqlx::query("DELETE FROM job WHERE job_name = ?").bind(job_name).execute(pool).await?;
    Ok(())
}

// ---------- prototype / sample ----------

/// 添加原型记录
pub async fn add_prototype(pool: &SqlitePool, record: &PrototypeRecord) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO prototype (name, centroid, sample_count, color, description, category, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&record.name)
    .bind(vec_to_blob(&record.centroid))
    .bind(record.sample_count)
    .bind(&record.color)
    .bind(&record.description)
    .bind(&record.category)
    .bind(record.created_at)
    .bind(record.updated_at)
    .fetch_one(pool)
    .await?;

    Ok(row.get(0))
}

fn prototype_from_row(row: sqlx::sqlite::SqliteRow) -> PrototypeRecord {
    PrototypeRecord {
        id: row.get(0),
        name: row.get(1),
        centroid: blob_to_vec(&row.get::<Vec<u8>, _>(2)),
        sample_count: row.get(3),
        color: row.get(4),
        description: row.get(5),
        category: row.get(6),
        created_at: row.get(7),
        updated_at: row.get(8),
    }
}

const PROTOTYPE_COLUMNS: &str =
    "id, name, centroid, sample_count, color, description, category, created_at, updated_at";

pub async fn get_prototype(pool: &SqlitePool, id: i64) -> Result<Option<PrototypeRecord>> {
    let row = sqlx::query(&format!("SELECT {PROTOTYPE_COLUMNS} FROM prototype WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(prototype_from_row))
}

pub async fn get_prototype_by_name(pool: &SqlitePool, name: &str) -> Result<Option<PrototypeRecord>> {
    let row = sqlx::query(&format!("SELECT {PROTOTYPE_COLUMNS} FROM prototype WHERE name = ?"))
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(prototype_from_row))
}

pub async fn list_prototypes(pool: &SqlitePool) -> Result<Vec<PrototypeRecord>> {
    let rows = sqlx::query(&format!("SELECT {PROTOTYPE_COLUMNS} FROM prototype ORDER BY id ASC"))
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(prototype_from_row).collect())
}

/// 更新原型的质心和样本数量
pub async fn update_prototype_centroid(
    pool: &SqlitePool,
    id: i64,
    centroid: &[f32],
    sample_count: i64,
    updated_at: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE prototype SET centroid = ?, sample_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(vec_to_blob(centroid))
    .bind(sample_count)
    .bind(updated_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// 删除原型，所属样本级联删除
pub async fn delete_prototype(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM prototype WHERE id = ?").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// 添加样本记录
pub async fn add_sample(pool: &SqlitePool, record: &SampleRecord) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO sample (prototype_id, source_uri, crop_rect, embedding, added_at, thumbnail_path)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(record.prototype_id)
    .bind(&record.source_uri)
    .bind(&record.crop_rect)
    .bind(vec_to_blob(&record.embedding))
    .bind(record.added_at)
    .bind(&record.thumbnail_path)
    .fetch_one(pool)
    .await?;

    Ok(row.get(0))
}

fn sample_from_row(row: sqlx::sqlite::SqliteRow) -> SampleRecord {
    SampleRecord {
        id: row.get(0),
        prototype_id: row.get(1),
        source_uri: row.get(2),
        crop_rect: row.get(3),
        embedding: blob_to_vec(&row.get::<Vec<u8>, _>(4)),
        added_at: row.get(5),
        thumbnail_path: row.get(6),
    }
}

const SAMPLE_COLUMNS: &str =
    "id, prototype_id, source_uri, crop_rect, embedding, added_at, thumbnail_path";

pub async fn get_sample(pool: &SqlitePool, id: i64) -> Result<Option<SampleRecord>> {
    let row = sqlx::query(&format!("SELECT {SAMPLE_COLUMNS} FROM sample WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(sample_from_row))
}

/// 原型的全部样本
pub async fn samples_for_prototype(pool: &SqlitePool, prototype_id: i64) -> Result<Vec<SampleRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {SAMPLE_COLUMNS} FROM sample WHERE prototype_id = ? ORDER BY id ASC"
    ))
    .bind(prototype_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(sample_from_row).collect())
}

pub async fn delete_sample(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sample WHERE id = ?").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

// ---------- tag / media_tag ----------

/// 插入或更新标签
pub async fn upsert_tag(pool: &SqlitePool, record: &TagRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tag (name, description, embedding, threshold, is_active)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            description = excluded.description,
            embedding = excluded.embedding,
            threshold = excluded.threshold,
            is_active = excluded.is_active
        "#,
    )
    .bind(&record.name)
    .bind(&record.description)
    .bind(vec_to_blob(&record.embedding))
    .bind(record.threshold)
    .bind(record.is_active)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_tag(pool: &SqlitePool, name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tag WHERE name = ?").bind(name).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// 标签列表，可选只返回启用的
pub async fn list_tags(pool: &SqlitePool, only_active: bool) -> Result<Vec<TagRecord>> {
    let sql = if only_active {
        "SELECT name, description, embedding, threshold, is_active FROM tag WHERE is_active = 1 ORDER BY name"
    } else {
        "SELECT name, description, embedding, threshold, is_active FROM tag ORDER BY name"
    };
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| TagRecord {
            name: row.get(0),
            description: row.get(1),
            embedding: blob_to_vec(&row.get::<Vec<u8>, _>(2)),
            threshold: row.get(3),
            is_active: row.get(4),
        })
        .collect())
}

/// 删除某个媒体的全部自动指定标签，用户手动指定的保留
pub async fn delete_auto_assignments(
    tx: &mut Transaction<'_, Sqlite>,
    media_id: i64,
) -> Result<()> {
    sqlx::query("DELETE FROM media_tag WHERE media_id = ? AND is_user_assigned = 0")
        .bind(media_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// 插入一条标签关联
pub async fn add_assignment(
    tx: &mut Transaction<'_, Sqlite>,
    assignment: &MediaTagAssignment,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO media_tag (media_id, tag_name, confidence, is_user_assigned)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(assignment.media_id)
    .bind(&assignment.tag_name)
    .bind(assignment.confidence)
    .bind(assignment.is_user_assigned)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// 某个媒体当前的全部标签关联
pub async fn assignments_for_media(pool: &SqlitePool, media_id: i64) -> Result<Vec<MediaTagAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT media_id, tag_name, confidence, is_user_assigned
        FROM media_tag WHERE media_id = ? ORDER BY tag_name
        "#,
    )
    .bind(media_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| MediaTagAssignment {
            media_id: row.get(0),
            tag_name: row.get(1),
            confidence: row.get(2),
            is_user_assigned: row.get(3),
        })
        .collect())
}
