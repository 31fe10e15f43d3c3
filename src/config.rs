use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::store::MediaKind;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "", "semsearch").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "semsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// semsearch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    /// 嵌入向量维数
    #[arg(short, long, value_name = "D", default_value_t = 512)]
    pub dim: usize,
    /// 嵌入服务地址
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8100")]
    pub provider_url: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并把媒体文件登记进注册表
    Add(AddCommand),
    /// 为已登记的媒体分批生成并存储嵌入向量
    Index(IndexCommand),
    /// 以文本、图片或原型为查询进行相似度搜索
    Search(SearchCommand),
    /// 管理少样本原型
    Prototype(PrototypeCommand),
    /// 管理标签与自动打标
    Tag(TagCommand),
    /// 显示存储与任务状态
    Show(ShowCommand),
    /// 清理存储中已失效的媒体记录
    Clean(CleanCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("semsearch.db")
    }

    /// 返回某类媒体的向量存储文件路径
    pub fn store(&self, kind: MediaKind) -> PathBuf {
        self.path.join(format!("{}.vec", kind))
    }

    /// 返回某个任务的暂存 ID 列表文件路径
    pub fn staging(&self, job_name: &str) -> PathBuf {
        self.path.join(format!("{}.staging", job_name))
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
