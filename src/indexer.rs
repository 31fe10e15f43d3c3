use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{LE, ReadBytesExt, WriteBytesExt};
use futures::StreamExt;
use futures::stream;
use log::{error, info, warn};
use tokio::task::{block_in_place, spawn_blocking};

use crate::db::{Database, crud};
use crate::governor::ConcurrencyGovernor;
use crate::ledger::JobLedger;
use crate::provider::EmbeddingProvider;
use crate::store::{EmbeddingRecord, MediaKind, VectorStore};
use crate::utils::now_ms;

/// 每个批次处理的媒体数量
pub const BATCH_SIZE: usize = 500;

/// 按任务实例注入的进度回调
pub trait IndexObserver: Send + Sync {
    /// 累计进度更新（含历史运行）
    fn on_progress(&self, _processed: i64, _total: usize) {}
    /// 一个批次完成
    fn on_batch_complete(&self, _batch: usize, _total_batches: usize, _processed: usize) {}
    /// 一个批次失败
    fn on_fail(&self, _batch: usize, _error: &anyhow::Error) {}
}

/// 不关心进度时使用
pub struct NoopObserver;

impl IndexObserver for NoopObserver {}

/// 整条任务链完成后的汇总报告
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub job_name: String,
    /// 候选媒体总数
    pub total_media: usize,
    pub total_batches: usize,
    /// 本次运行从第几个批次开始（断点续跑时大于 0）
    pub resumed_from: usize,
    /// 跨全部运行的累计处理数量
    pub processed: i64,
    pub started_at: i64,
    pub finished_at: i64,
}

/// 分批索引器
///
/// 把一份可能很大的媒体 ID 集合切成固定大小的批次，严格串行执行：
/// 候选 ID 列表先持久化到暂存文件作为崩溃后的重启点；每个批次内先
/// 剔除存储中已有的 ID，再以受并发度约束的并行度生成嵌入，结果攒在
/// 批次本地缓冲里，批次结束时一次性追加进存储，绝不逐条写入——
/// 因此任意时刻取消都不会在存储里留下半截记录。
/// 每个批次在任务账本中留下一条运行记录，跨重试的累计进度由账本给出
pub struct BatchIndexer {
    pool: Database,
    store: VectorStore,
    staging_path: PathBuf,
    kind: MediaKind,
    governor: ConcurrencyGovernor,
    batch_size: usize,
}

impl BatchIndexer {
    pub fn new(pool: Database, store: VectorStore, staging_path: PathBuf, kind: MediaKind) -> Self {
        Self {
            pool,
            store,
            staging_path,
            kind,
            governor: ConcurrencyGovernor::default(),
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_governor(mut self, governor: ConcurrencyGovernor) -> Self {
        self.governor = governor;
        self
    }

    /// 账本中使用的任务名
    pub fn job_name(&self) -> String {
        format!("index-{}", self.kind)
    }

    /// 执行整条批次链
    ///
    /// 暂存文件存在时从账本记录的成功批次数继续；某个批次失败会中止
    /// 后续批次，并保留暂存文件和账本记录以便下次续跑。只有整条链
    /// 成功后才删除暂存文件、清空账本
    pub async fn run<P, O>(&self, provider: &P, observer: &O) -> Result<IndexReport>
    where
        P: EmbeddingProvider,
        O: IndexObserver,
    {
        let job_name = self.job_name();
        let ledger = JobLedger::new(self.pool.clone());
        let started_at = now_ms();

        let ids = if self.staging_path.exists() {
            let ids = load_staging(&self.staging_path)?;
            info!("发现暂存文件，续跑 {} 个候选媒体", ids.len());
            ids
        } else {
            let ids = crud::media_ids(&self.pool, self.kind.as_str()).await?;
            write_staging(&self.staging_path, &ids)?;
            ids
        };

        let total = ids.len();
        let total_batches = total.div_ceil(self.batch_size);
        let first_batch = ledger.completed_batches(&job_name).await? as usize;
        if first_batch > 0 {
            info!("批次 0..{} 已完成，从批次 {} 继续", first_batch, first_batch);
        }

        // 存储中已有的 ID，避免重复生成嵌入
        let mut known: HashSet<i64> = if self.store.exists() {
            block_in_place(|| self.store.load(None))?.iter().map(|r| r.id).collect()
        } else {
            HashSet::new()
        };

        for batch in first_batch..total_batches {
            let lo = batch * self.batch_size;
            let hi = ((batch + 1) * self.batch_size).min(total);
            let slice = &ids[lo..hi];

            let (start_time, cumulative) = ledger.on_start(&job_name).await?;

            match self.run_batch(provider, slice, &known).await {
                Ok(records) => {
                    let processed = records.len();
                    if !records.is_empty() {
                        block_in_place(|| self.store.append(&records))?;
                        known.extend(records.iter().map(|r| r.id));
                    }
                    ledger.on_complete(&job_name, start_time, processed as i64).await?;
                    observer.on_batch_complete(batch, total_batches, processed);
                    observer.on_progress(cumulative + processed as i64, total);
                    info!("批次 {}/{} 完成，处理 {} 条", batch + 1, total_batches, processed);
                }
                Err(e) => {
                    ledger.on_error(&job_name, start_time).await?;
                    observer.on_fail(batch, &e);
                    error!("批次 {}/{} 失败: {}", batch + 1, total_batches, e);
                    return Err(e);
                }
            }
        }

        let processed = match ledger.aggregate(&job_name).await? {
            Some(summary) => summary.total_processed,
            None => 0,
        };

        if self.staging_path.exists() {
            std::fs::remove_file(&self.staging_path)?;
        }
        ledger.clear(&job_name).await?;

        Ok(IndexReport {
            job_name,
            total_media: total,
            total_batches,
            resumed_from: first_batch,
            processed,
            started_at,
            finished_at: now_ms(),
        })
    }

    /// 执行单个批次：剔除已索引的 ID，受并发度约束地并行生成嵌入
    ///
    /// 单条媒体的嵌入失败只记录日志并跳过，不计入处理数量，也不影响
    /// 批次本身
    async fn run_batch<P: EmbeddingProvider>(
        &self,
        provider: &P,
        slice: &[i64],
        known: &HashSet<i64>,
    ) -> Result<Vec<EmbeddingRecord>> {
        let pending: Vec<i64> = slice.iter().copied().filter(|id| !known.contains(id)).collect();
        if pending.is_empty() {
            return Ok(vec![]);
        }

        let mut paths = Vec::with_capacity(pending.len());
        for id in pending {
            match crud::get_media_path(&self.pool, id).await? {
                Some(path) => paths.push((id, path)),
                None => warn!("媒体 {} 不在注册表中，跳过", id),
            }
        }

        let level = self.governor.level();
        let results: Vec<Option<EmbeddingRecord>> = stream::iter(paths)
            .map(|(id, path)| async move {
                let data = match spawn_blocking(move || std::fs::read(&path)).await? {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("读取媒体 {} 失败，跳过: {}", id, e);
                        return anyhow::Ok(None);
                    }
                };
                match provider.embed_image(&data).await {
                    Ok(vector) => {
                        anyhow::Ok(Some(EmbeddingRecord { id, timestamp: now_ms(), vector }))
                    }
                    Err(e) => {
                        warn!("媒体 {} 嵌入生成失败，跳过: {}", id, e);
                        anyhow::Ok(None)
                    }
                }
            })
            .buffer_unordered(level)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        let mut records: Vec<EmbeddingRecord> = results.into_iter().flatten().collect();
        // 批内并发是无序的，按 ID 排序让追加结果可复现
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}

/// 把候选 ID 列表持久化到暂存文件（i32 数量 + i64 列表，小端），
/// 先写临时文件再原子改名
fn write_staging(path: &Path, ids: &[i64]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_i32::<LE>(ids.len() as i32)?;
        for id in ids {
            writer.write_i64::<LE>(*id)?;
        }
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// 读取暂存的候选 ID 列表
fn load_staging(path: &Path) -> Result<Vec<i64>> {
    let mut reader = BufReader::new(File::open(path)?);
    let count = reader.read_i32::<LE>()?;
    anyhow::ensure!(count >= 0, "暂存文件损坏: 数量为 {}", count);
    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        ids.push(reader.read_i64::<LE>().context("暂存文件被截断")?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index-image.staging");
        let ids = vec![3i64, 1, 4, 1, 5, 9, 2, 6];
        write_staging(&path, &ids).unwrap();
        assert_eq!(load_staging(&path).unwrap(), ids);
    }

    #[test]
    fn staging_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index-video.staging");
        write_staging(&path, &[]).unwrap();
        assert!(load_staging(&path).unwrap().is_empty());
    }
}
