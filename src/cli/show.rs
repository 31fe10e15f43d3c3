use clap::Parser;
use tokio::task::block_in_place;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};
use crate::ledger::JobLedger;
use crate::store::{MediaKind, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let ledger = JobLedger::new(db.clone());

        for kind in [MediaKind::Image, MediaKind::Video] {
            let registered = crud::count_media(&db, kind.as_str()).await?;
            let store = VectorStore::new(opts.conf_dir.store(kind));
            let indexed = if store.exists() { block_in_place(|| store.count())? } else { 0 };

            println!("{}: 已登记 {}，已索引 {}", kind, registered, indexed);

            // 任务链执行中（或中断后）账本里会留有记录
            let job_name = format!("index-{}", kind);
            if let Some(summary) = ledger.aggregate(&job_name).await? {
                let staging = opts.conf_dir.staging(&job_name);
                println!(
                    "  任务 {}: {} 次运行，累计处理 {}，{}{}",
                    summary.job_name,
                    summary.runs,
                    summary.total_processed,
                    if summary.all_success { "全部成功" } else { "存在失败" },
                    if staging.exists() { "，可续跑" } else { "" }
                );
            }
        }

        Ok(())
    }
}
