use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, bail};
use byteorder::{LE, WriteBytesExt};
use tempfile::TempDir;

use semsearch::db::{Database, crud, init_db};
use semsearch::governor::{ConcurrencyGovernor, MemoryProbe};
use semsearch::indexer::{BatchIndexer, IndexObserver, NoopObserver};
use semsearch::ledger::JobLedger;
use semsearch::provider::EmbeddingProvider;
use semsearch::store::{EmbeddingRecord, MediaKind, VectorStore};

const DIM: usize = 4;

/// 嵌入内容即文件内容，记录每次成功嵌入的输入以便断言
struct MockProvider {
    embedded: Mutex<Vec<String>>,
    fail_on: Option<String>,
}

impl MockProvider {
    fn new() -> Self {
        Self { embedded: Mutex::new(vec![]), fail_on: None }
    }

    fn failing_on(content: &str) -> Self {
        Self { embedded: Mutex::new(vec![]), fail_on: Some(content.to_string()) }
    }

    fn embedded(&self) -> HashSet<String> {
        self.embedded.lock().unwrap().iter().cloned().collect()
    }
}

impl EmbeddingProvider for MockProvider {
    async fn embed_image(&self, data: &[u8]) -> Result<Vec<f32>> {
        let text = String::from_utf8_lossy(data).to_string();
        if self.fail_on.as_deref() == Some(text.as_str()) {
            bail!("mock embed failure: {text}");
        }
        self.embedded.lock().unwrap().push(text.clone());
        Ok(vector_for(&text))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(vector_for(text))
    }
}

fn vector_for(text: &str) -> Vec<f32> {
    let seed = text.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    (0..DIM).map(|i| (seed.wrapping_add(i as u32) % 97) as f32 / 97.0).collect()
}

struct FixedProbe;

impl MemoryProbe for FixedProbe {
    fn available_mb(&self) -> Option<u64> {
        Some(4000)
    }
}

fn governor() -> ConcurrencyGovernor {
    ConcurrencyGovernor::new(Box::new(FixedProbe))
}

/// 建库并登记 n 个媒体文件，文件内容为 `media-{i}`
async fn setup(dir: &Path, n: usize) -> Result<(Database, Vec<i64>)> {
    let db = init_db(dir.join("semsearch.db")).await?;
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let path = dir.join(format!("m{i}.jpg"));
        fs::write(&path, format!("media-{i}"))?;
        let id = crud::add_media(
            &db,
            format!("hash-{i}").as_bytes(),
            path.to_str().unwrap(),
            "image",
        )
        .await?;
        ids.push(id);
    }
    Ok((db, ids))
}

fn indexer(db: &Database, dir: &Path, batch_size: usize) -> BatchIndexer {
    BatchIndexer::new(
        db.clone(),
        VectorStore::new(dir.join("image.vec")),
        dir.join("index-image.staging"),
        MediaKind::Image,
    )
    .with_batch_size(batch_size)
    .with_governor(governor())
}

fn stored_ids(dir: &Path) -> Vec<i64> {
    VectorStore::new(dir.join("image.vec")).load(Some(DIM)).unwrap().iter().map(|r| r.id).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn full_chain_indexes_all_media() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, ids) = setup(dir.path(), 5).await?;

    let provider = MockProvider::new();
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    assert_eq!(report.total_media, 5);
    assert_eq!(report.total_batches, 3);
    assert_eq!(report.resumed_from, 0);
    assert_eq!(report.processed, 5);

    let mut indexed = stored_ids(dir.path());
    indexed.sort();
    assert_eq!(indexed, ids);

    // 整条链成功后暂存文件删除、账本清空
    assert!(!dir.path().join("index-image.staging").exists());
    assert!(JobLedger::new(db.clone()).aggregate("index-image").await?.is_none());
    Ok(())
}

/// 第一个批次完成后破坏存储文件头，使下一个批次的追加失败
struct CorruptAfterFirstBatch {
    store_path: PathBuf,
}

impl IndexObserver for CorruptAfterFirstBatch {
    fn on_batch_complete(&self, batch: usize, _total_batches: usize, _processed: usize) {
        if batch == 0 {
            let mut file = OpenOptions::new().write(true).open(&self.store_path).unwrap();
            file.write_i32::<LE>(100000).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_batch_halts_chain_and_resume_skips_completed() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, ids) = setup(dir.path(), 5).await?;
    let store_path = dir.path().join("image.vec");
    let staging = dir.path().join("index-image.staging");
    let ledger = JobLedger::new(db.clone());

    // 第一轮：批次 0 成功后存储被破坏，批次 1 追加失败，链中止
    let provider = MockProvider::new();
    let observer = CorruptAfterFirstBatch { store_path: store_path.clone() };
    let result = indexer(&db, dir.path(), 2).run(&provider, &observer).await;
    assert!(result.is_err());

    // 暂存文件和账本保留，成功批次数为 1
    assert!(staging.exists());
    assert_eq!(ledger.completed_batches("index-image").await?, 1);
    let summary = ledger.aggregate("index-image").await?.unwrap();
    assert!(!summary.all_success);
    assert_eq!(summary.total_processed, 2);

    // 修复文件头（批次 0 写入了 2 条记录）
    let mut file = OpenOptions::new().write(true).open(&store_path)?;
    file.write_i32::<LE>(2)?;
    file.sync_all()?;
    drop(file);

    // 第二轮：从批次 1 继续，批次 0 的媒体不会再次送入嵌入
    let provider = MockProvider::new();
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    assert_eq!(report.resumed_from, 1);
    assert_eq!(report.processed, 5);
    assert_eq!(
        provider.embedded(),
        HashSet::from(["media-2".to_string(), "media-3".to_string(), "media-4".to_string()])
    );

    let mut indexed = stored_ids(dir.path());
    indexed.sort();
    assert_eq!(indexed, ids);

    assert!(!staging.exists());
    assert!(ledger.aggregate("index-image").await?.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn already_indexed_media_are_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, ids) = setup(dir.path(), 5).await?;

    // 预先放入两条已索引记录
    let store = VectorStore::new(dir.path().join("image.vec"));
    store.save(&[
        EmbeddingRecord { id: ids[0], timestamp: 1, vector: vector_for("media-0") },
        EmbeddingRecord { id: ids[3], timestamp: 1, vector: vector_for("media-3") },
    ])?;

    let provider = MockProvider::new();
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    assert_eq!(report.processed, 3);
    assert_eq!(
        provider.embedded(),
        HashSet::from(["media-1".to_string(), "media-2".to_string(), "media-4".to_string()])
    );

    let indexed = stored_ids(dir.path());
    assert_eq!(indexed.len(), 5);
    assert_eq!(indexed.iter().collect::<HashSet<_>>().len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn per_item_embed_failure_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, ids) = setup(dir.path(), 4).await?;

    let provider = MockProvider::failing_on("media-1");
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    // 单条失败只跳过，不中止批次链
    assert_eq!(report.processed, 3);
    let indexed = stored_ids(dir.path());
    assert!(!indexed.contains(&ids[1]));
    assert_eq!(indexed.len(), 3);
    assert!(!dir.path().join("index-image.staging").exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unreadable_media_file_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, ids) = setup(dir.path(), 3).await?;
    fs::remove_file(dir.path().join("m2.jpg"))?;

    let provider = MockProvider::new();
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    assert_eq!(report.processed, 2);
    let indexed = stored_ids(dir.path());
    assert!(!indexed.contains(&ids[2]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_registry_produces_empty_report() -> Result<()> {
    let dir = TempDir::new()?;
    let (db, _) = setup(dir.path(), 0).await?;

    let provider = MockProvider::new();
    let report = indexer(&db, dir.path(), 2).run(&provider, &NoopObserver).await?;

    assert_eq!(report.total_media, 0);
    assert_eq!(report.total_batches, 0);
    assert_eq!(report.processed, 0);
    assert!(!VectorStore::new(dir.path().join("image.vec")).exists());
    Ok(())
}
