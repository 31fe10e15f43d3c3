use anyhow::Result;

use crate::db::{Database, JobRecord, crud};
use crate::utils::now_ms;

/// 同名任务全部运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub job_name: String,
    /// 运行次数
    pub runs: i64,
    /// 累计处理数量
    pub total_processed: i64,
    /// 最早一次开始时间
    pub first_start: i64,
    /// 最近一次结束时间
    pub last_finish: i64,
    /// 是否全部成功
    pub all_success: bool,
}

/// 任务账本
///
/// 每个批次运行对应一条持久化的 JobRecord；进度上报取同名记录的
/// 累计处理数量，因此跨重试、跨重启的进度是准确的
#[derive(Clone)]
pub struct JobLedger {
    pool: Database,
}

impl JobLedger {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    /// 批次开始，返回开始时间和此前同名记录的累计处理数量
    pub async fn on_start(&self, job_name: &str) -> Result<(i64, i64)> {
        let cumulative = crud::jobs_processed_total(&self.pool, job_name).await?;
        Ok((now_ms(), cumulative))
    }

    /// 批次成功，落一条成功记录
    pub async fn on_complete(&self, job_name: &str, start_time: i64, processed: i64) -> Result<()> {
        let record = JobRecord {
            job_name: job_name.to_string(),
            start_time,
            finish_time: now_ms(),
            processed_count: processed,
            is_success: true,
        };
        crud::add_job(&self.pool, &record).await?;
        Ok(())
    }

    /// 批次失败，落一条失败记录
    pub async fn on_error(&self, job_name: &str, start_time: i64) -> Result<()> {
        let record = JobRecord {
            job_name: job_name.to_string(),
            start_time,
            finish_time: now_ms(),
            processed_count: 0,
            is_success: false,
        };
        crud::add_job(&self.pool, &record).await?;
        Ok(())
    }

    /// 同名任务已成功的批次数，用于断点续跑
    pub async fn completed_batches(&self, job_name: &str) -> Result<i64> {
        Ok(crud::jobs_success_count(&self.pool, job_name).await?)
    }

    /// 汇总同名任务的全部运行记录
    pub async fn aggregate(&self, job_name: &str) -> Result<Option<JobSummary>> {
        let records = crud::list_jobs(&self.pool, job_name).await?;
        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(JobSummary {
            job_name: job_name.to_string(),
            runs: records.len() as i64,
            total_processed: records.iter().map(|r| r.processed_count).sum(),
            first_start: records.iter().map(|r| r.start_time).min().unwrap_or_default(),
            last_finish: records.iter().map(|r| r.finish_time).max().unwrap_or_default(),
            all_success: records.iter().all(|r| r.is_success),
        }))
    }

    /// 任务链完成后清空同名记录
    pub async fn clear(&self, job_name: &str) -> Result<()> {
        crud::clear_jobs(&self.pool, job_name).await?;
        Ok(())
    }
}
