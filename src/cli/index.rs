use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::init_db;
use crate::indexer::{BATCH_SIZE, BatchIndexer, IndexObserver};
use crate::provider::HttpProvider;
use crate::store::{MediaKind, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    /// 媒体类型
    #[arg(short, long, value_enum, default_value_t = MediaKind::Image)]
    pub kind: MediaKind,
    /// 每个批次处理的媒体数量
    #[arg(short, long, value_name = "N", default_value_t = BATCH_SIZE)]
    pub batch_size: usize,
}

struct ProgressBarObserver {
    pb: ProgressBar,
}

impl IndexObserver for ProgressBarObserver {
    fn on_progress(&self, processed: i64, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(processed.max(0) as u64);
    }

    fn on_batch_complete(&self, batch: usize, total_batches: usize, processed: usize) {
        self.pb.set_message(format!("批次 {}/{} (+{})", batch + 1, total_batches, processed));
    }

    fn on_fail(&self, batch: usize, error: &anyhow::Error) {
        self.pb.println(format!("批次 {} 失败: {}", batch, error));
    }
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let store = VectorStore::new(opts.conf_dir.store(self.kind));
        let provider = HttpProvider::new(&opts.provider_url);

        let indexer = BatchIndexer::new(
            db,
            store,
            opts.conf_dir.staging(&format!("index-{}", self.kind)),
            self.kind,
        )
        .with_batch_size(self.batch_size);

        let pb_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-");
        let observer =
            ProgressBarObserver { pb: ProgressBar::new(0).with_style(pb_style) };

        let report = indexer.run(&provider, &observer).await?;
        observer.pb.finish_with_message("索引完成");

        info!(
            "任务 {} 完成: {} 个候选，{} 个批次（续跑自 {}），累计处理 {} 条",
            report.job_name,
            report.total_media,
            report.total_batches,
            report.resumed_from,
            report.processed
        );
        Ok(())
    }
}
