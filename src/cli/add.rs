use std::collections::HashMap;
use std::path::PathBuf;

use blake3::Hash;
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressIterator, ProgressStyle};
use log::info;
use rayon::prelude::*;
use regex::Regex;
use tokio::task::block_in_place;
use walkdir::WalkDir;

use super::SubCommandExtend;
use crate::config::Opts;
use crate::db::{crud, init_db};
use crate::store::MediaKind;
use crate::utils;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 媒体文件或目录的路径
    pub path: String,
    /// 媒体类型
    #[arg(short, long, value_enum, default_value_t = MediaKind::Image)]
    pub kind: MediaKind,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png")]
    pub suffix: String,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re = Regex::new(&self.suffix.replace(',', "|")).expect("failed to build regex");
        let db = init_db(opts.conf_dir.database()).await?;
        let pb_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-");

        // 收集所有符合条件的文件路径
        info!("开始扫描目录: {}", self.path);
        let entries: Vec<PathBuf> = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(|entry| {
                entry.ok().and_then(|entry| {
                    let path = entry.path().to_path_buf();
                    if path.is_file()
                        && re.is_match(&path.extension().unwrap_or_default().to_string_lossy())
                    {
                        Some(path)
                    } else {
                        None
                    }
                })
            })
            .collect();
        info!("扫描完成，共 {} 个文件", entries.len());

        // 哈希计算是 CPU 密集操作，拆出异步上下文用 rayon 处理
        let entries: HashMap<Hash, PathBuf> = block_in_place(|| {
            let pb = ProgressBar::new(entries.len() as u64)
                .with_style(pb_style.clone())
                .with_message("计算文件哈希中...");
            entries
                .into_par_iter()
                .progress_with(pb)
                .filter_map(|entry| utils::hash_file(&entry).ok().map(|hash| (hash, entry)))
                .collect()
        });
        info!("计算哈希值完成，共 {} 个不重复文件", entries.len());

        let pb = ProgressBar::new(entries.len() as u64)
            .with_style(pb_style.clone())
            .with_message("登记媒体中...");
        let mut added = 0;
        for (hash, filename) in entries.into_iter().progress_with(pb) {
            if crud::check_media_hash(&db, hash.as_bytes()).await? {
                continue;
            }
            crud::add_media(
                &db,
                hash.as_bytes(),
                &filename.to_string_lossy(),
                self.kind.as_str(),
            )
            .await?;
            added += 1;
        }

        info!("登记完成，新增 {} 个媒体", added);
        Ok(())
    }
}
