use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};
use crate::provider::{MediaResolver, PathResolver};
use crate::store::{MediaKind, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    /// 媒体类型
    #[arg(short, long, value_enum, default_value_t = MediaKind::Image)]
    pub kind: MediaKind,
    /// 只报告不删除
    #[arg(long)]
    pub dry_run: bool,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let store = VectorStore::new(opts.conf_dir.store(self.kind));
        if !store.exists() {
            info!("向量存储不存在，无需清理");
            return Ok(());
        }

        let db = init_db(opts.conf_dir.database()).await?;
        let resolver = PathResolver::new(crud::media_paths(&db, self.kind.as_str()).await?);

        let records = block_in_place(|| store.load(None))?;
        let stale: Vec<i64> =
            records.iter().map(|r| r.id).filter(|id| !resolver.can_resolve(*id)).collect();

        if stale.is_empty() {
            info!("没有失效记录");
            return Ok(());
        }

        if self.dry_run {
            info!("发现 {} 条失效记录（dry-run，未删除）", stale.len());
        } else {
            let removed = block_in_place(|| store.remove(&stale))?;
            info!("已清除 {} 条失效记录", removed);
        }
        Ok(())
    }
}
