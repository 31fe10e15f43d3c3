use anyhow::bail;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use tokio::task::block_in_place;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::{TagRecord, crud, init_db};
use crate::provider::{EmbeddingProvider, HttpProvider};
use crate::store::{MediaKind, VectorStore};
use crate::tagger::Tagger;

#[derive(Parser, Debug, Clone)]
pub struct TagCommand {
    #[command(subcommand)]
    pub subcmd: TagSubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TagSubCommand {
    /// 新建或更新标签，标签嵌入由其描述文本生成
    Add(AddTag),
    /// 删除标签
    Remove(RemoveTag),
    /// 列出全部标签
    List,
    /// 对某类媒体的全部存量嵌入重新打标
    Retag(RetagCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct AddTag {
    /// 标签名，唯一
    pub name: String,
    /// 描述文本，作为标签嵌入的来源
    pub description: String,
    /// 自动打标的相似度阈值
    #[arg(long, value_name = "T", default_value_t = 0.28)]
    pub threshold: f32,
    /// 创建后不启用
    #[arg(long)]
    pub inactive: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct RemoveTag {
    pub name: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RetagCommand {
    /// 媒体类型
    #[arg(short, long, value_enum, default_value_t = MediaKind::Image)]
    pub kind: MediaKind,
}

impl SubCommandExtend for TagCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;

        match &self.subcmd {
            TagSubCommand::Add(cmd) => {
                let provider = HttpProvider::new(&opts.provider_url);
                let embedding = provider.embed_text(&cmd.description).await?;
                let record = TagRecord {
                    name: cmd.name.clone(),
                    description: cmd.description.clone(),
                    embedding,
                    threshold: cmd.threshold,
                    is_active: !cmd.inactive,
                };
                crud::upsert_tag(&db, &record).await?;
                info!("标签 {} 已保存，阈值 {}", record.name, record.threshold);
            }
            TagSubCommand::Remove(cmd) => {
                if crud::delete_tag(&db, &cmd.name).await? {
                    info!("标签 {} 已删除", cmd.name);
                } else {
                    info!("标签 {} 不存在", cmd.name);
                }
            }
            TagSubCommand::List => {
                for tag in crud::list_tags(&db, false).await? {
                    println!(
                        "{}\t阈值 {:.2}\t{}\t{}",
                        tag.name,
                        tag.threshold,
                        if tag.is_active { "启用" } else { "停用" },
                        tag.description
                    );
                }
            }
            TagSubCommand::Retag(cmd) => {
                let store = VectorStore::new(opts.conf_dir.store(cmd.kind));
                if !store.exists() {
                    bail!("向量存储不存在，请先运行 index");
                }
                let records = block_in_place(|| store.load(Some(opts.dim)))?;

                let pb_style = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                    .unwrap()
                    .progress_chars("#>-");
                let pb = ProgressBar::new(records.len() as u64).with_style(pb_style);

                let tagger = Tagger::new(db);
                let assigned = tagger
                    .retag_all(&records, |current, _total| pb.set_position(current as u64))
                    .await?;
                pb.finish();

                info!("重新打标完成，{} 条媒体，共 {} 条自动标签", records.len(), assigned);
            }
        }
        Ok(())
    }
}
