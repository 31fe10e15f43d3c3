use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::init_db;
use crate::prototype::{CropRect, PrototypeAggregator, RemoveOutcome};
use crate::provider::HttpProvider;

#[derive(Parser, Debug, Clone)]
pub struct PrototypeCommand {
    #[command(subcommand)]
    pub subcmd: PrototypeSubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PrototypeSubCommand {
    /// 用若干样本裁剪创建原型
    Create(CreatePrototype),
    /// 为已有原型新增样本
    AddSample(AddSample),
    /// 删除样本，删到最后一个时原型随之删除
    RemoveSample(RemoveSample),
    /// 删除整个原型
    Delete(DeletePrototype),
    /// 列出全部原型
    List,
}

#[derive(Parser, Debug, Clone)]
pub struct CreatePrototype {
    /// 原型名称，必须唯一
    pub name: String,
    /// 样本，格式为 `图片路径|{"left":L,"top":T,"width":W,"height":H}`，建议 3~10 个
    #[arg(short, long = "sample", required = true)]
    pub samples: Vec<String>,
    /// 展示颜色
    #[arg(long, default_value = "#4e9a06")]
    pub color: String,
    /// 描述
    #[arg(long)]
    pub description: Option<String>,
    /// 分类
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AddSample {
    /// 原型 ID
    pub prototype_id: i64,
    /// 样本图片路径
    pub uri: String,
    /// 裁剪区域 JSON
    pub rect: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RemoveSample {
    /// 样本 ID
    pub sample_id: i64,
    /// 所属原型 ID
    pub prototype_id: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct DeletePrototype {
    /// 原型 ID
    pub prototype_id: i64,
}

impl SubCommandExtend for PrototypeCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = init_db(opts.conf_dir.database()).await?;
        let provider = HttpProvider::new(&opts.provider_url);
        let prototypes = PrototypeAggregator::new(db);

        match &self.subcmd {
            PrototypeSubCommand::Create(cmd) => {
                let samples = cmd
                    .samples
                    .iter()
                    .map(|s| parse_sample(s))
                    .collect::<Result<Vec<_>>>()?;
                let record = prototypes
                    .create(
                        &provider,
                        &cmd.name,
                        &cmd.color,
                        cmd.description.clone(),
                        cmd.category.clone(),
                        &samples,
                    )
                    .await?;
                info!("原型 {} 已创建，ID {}", record.name, record.id);
            }
            PrototypeSubCommand::AddSample(cmd) => {
                let rect = CropRect::from_json(&cmd.rect)?;
                let sample =
                    prototypes.add_sample(&provider, cmd.prototype_id, &cmd.uri, &rect).await?;
                info!("样本 {} 已加入原型 {}", sample.id, cmd.prototype_id);
            }
            PrototypeSubCommand::RemoveSample(cmd) => {
                match prototypes.remove_sample(cmd.sample_id, cmd.prototype_id).await? {
                    RemoveOutcome::Updated { sample_count } => {
                        info!("样本已删除，原型剩余 {} 个样本", sample_count)
                    }
                    RemoveOutcome::PrototypeDeleted => {
                        info!("最后一个样本被删除，原型 {} 已移除", cmd.prototype_id)
                    }
                }
            }
            PrototypeSubCommand::Delete(cmd) => {
                if prototypes.delete(cmd.prototype_id).await? {
                    info!("原型 {} 已删除", cmd.prototype_id);
                } else {
                    info!("原型 {} 不存在", cmd.prototype_id);
                }
            }
            PrototypeSubCommand::List => {
                for p in prototypes.list().await? {
                    println!(
                        "{}\t{}\t{} 个样本\t{}维\t{}",
                        p.id,
                        p.name,
                        p.sample_count,
                        p.centroid.len(),
                        p.category.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Ok(())
    }
}

/// 解析 `路径|裁剪JSON` 形式的样本参数
fn parse_sample(s: &str) -> Result<(String, CropRect)> {
    let (uri, rect) = s.split_once('|').context("样本格式应为 `路径|裁剪JSON`")?;
    Ok((uri.to_string(), CropRect::from_json(rect)?))
}
