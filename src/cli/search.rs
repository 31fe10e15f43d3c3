use std::collections::HashMap;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde_json::json;
use tokio::task::block_in_place;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};
use crate::provider::{EmbeddingProvider, HttpProvider, PathResolver};
use crate::retriever::SimilarityRetriever;
use crate::store::{MediaKind, VectorStore};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 文本查询
    #[arg(short, long, conflicts_with_all = ["image", "prototype"])]
    pub text: Option<String>,
    /// 图片查询，参数为图片路径
    #[arg(short, long, conflicts_with = "prototype")]
    pub image: Option<String>,
    /// 原型查询，参数为原型名称，以其质心作为查询向量
    #[arg(short, long)]
    pub prototype: Option<String>,
    /// 媒体类型
    #[arg(short, long, value_enum, default_value_t = MediaKind::Image)]
    pub kind: MediaKind,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 相似度阈值
    #[arg(long, value_name = "T", default_value_t = 0.25)]
    pub threshold: f32,
    /// 把查询中发现的失效记录从存储中删除
    #[arg(long)]
    pub purge: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let provider = HttpProvider::new(&opts.provider_url);

        let query = if let Some(text) = &self.text {
            provider.embed_text(text).await?
        } else if let Some(image) = &self.image {
            let data = std::fs::read(image)?;
            provider.embed_image(&data).await?
        } else if let Some(name) = &self.prototype {
            match crud::get_prototype_by_name(&db, name).await? {
                // 质心不是单位向量，检索端按余弦相似度归一
                Some(prototype) => prototype.centroid,
                None => bail!("原型不存在: {}", name),
            }
        } else {
            bail!("需要指定 --text、--image 或 --prototype 之一");
        };

        let store = VectorStore::new(opts.conf_dir.store(self.kind));
        if !store.exists() {
            bail!("向量存储不存在，请先运行 index");
        }

        let paths: HashMap<i64, String> =
            crud::media_paths(&db, self.kind.as_str()).await?.into_iter().collect();
        let resolver = PathResolver::new(paths.clone());

        let mut retriever =
            block_in_place(|| SimilarityRetriever::from_store(&store, Some(opts.dim)))?;
        let outcome = retriever.query(&query, self.count, self.threshold, &resolver);

        if !outcome.stale.is_empty() {
            if self.purge {
                let removed = block_in_place(|| store.remove(&outcome.stale))?;
                info!("已从存储中清除 {} 条失效记录", removed);
            } else {
                warn!("发现 {} 条失效记录，可用 --purge 清除", outcome.stale.len());
            }
        }

        info!("命中 {} 条（显示前 {} 条）", outcome.total_matches, outcome.results.len());
        print_result(&outcome.results, &paths, self)
    }
}

fn print_result(
    results: &[crate::retriever::ScoredId],
    paths: &HashMap<i64, String>,
    opts: &SearchCommand,
) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            let rows: Vec<_> = results
                .iter()
                .map(|s| json!({ "id": s.id, "score": s.score, "path": paths.get(&s.id) }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?)
        }
        OutputFormat::Table => {
            for s in results {
                let path = paths.get(&s.id).map(String::as_str).unwrap_or("?");
                println!("{:.4}\t{}\t{}", s.score, s.id, path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
