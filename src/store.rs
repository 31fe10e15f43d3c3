use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};
use log::debug;

/// 文件头长度：i32 记录数
const HEADER_LEN: u64 = 4;
/// 单条记录的最小长度：id + timestamp + length（向量为空时）
const MIN_RECORD_LEN: u64 = 8 + 8 + 4;
/// 头部合法性校验允许的松弛字节数
const CORRUPTION_SLACK: u64 = 64;

/// 媒体类型，图片和视频各自持有一个独立的向量存储文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条媒体向量记录
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// 外部稳定的媒体 ID
    pub id: i64,
    /// 生成时间，毫秒
    pub timestamp: i64,
    /// 嵌入向量
    pub vector: Vec<f32>,
}

/// 向量存储错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 文件头声明的记录数超出文件实际大小所能容纳的范围
    #[error("store corrupted: header claims {count} records but file is {file_len} bytes")]
    Corrupt { count: i64, file_len: u64 },
    /// 记录声明的向量长度与期望维数不符
    #[error("vector length mismatch: expected {expected}, found {found}")]
    FormatMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 二进制向量存储
///
/// 布局（全部小端）：`i32 count`，随后 count 条
/// `i64 id | i64 timestamp | i32 length | length × f32` 记录。
/// 追加路径一次性写入整批记录并更新文件头，不存在写了一半的记录。
pub struct VectorStore {
    path: PathBuf,
}

impl VectorStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 存储文件是否存在
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 读取全部记录
    ///
    /// 给定 `require_dim` 时校验每条记录的向量长度并整块读取；
    /// 否则逐元素读取，允许混合长度（慢速路径）
    pub fn load(&self, require_dim: Option<usize>) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let count = reader.read_i32::<LE>()?;
        validate_header(count, file_len)?;

        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = reader.read_i64::<LE>()?;
            let timestamp = reader.read_i64::<LE>()?;
            let length = reader.read_i32::<LE>()? as usize;

            let vector = match require_dim {
                Some(dim) => {
                    if length != dim {
                        return Err(StoreError::FormatMismatch { expected: dim, found: length });
                    }
                    let mut buf = vec![0u8; length * 4];
                    reader.read_exact(&mut buf)?;
                    bytemuck::pod_collect_to_vec(&buf)
                }
                None => {
                    let mut vector = Vec::with_capacity(length);
                    for _ in 0..length {
                        vector.push(reader.read_f32::<LE>()?);
                    }
                    vector
                }
            };

            records.push(EmbeddingRecord { id, timestamp, vector });
        }

        debug!("loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// 全量写入，用于初次创建或整体重写
    pub fn save(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);

        writer.write_i32::<LE>(records.len() as i32)?;
        for record in records {
            write_record(&mut writer, record)?;
        }

        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    /// 追加一批记录
    ///
    /// 存储不存在时等价于 `save`；否则校验现有文件头后回写新的记录数，
    /// 并在文件末尾逐条追加序列化字节，最后强制落盘
    pub fn append(&self, records: &[EmbeddingRecord]) -> Result<(), StoreError> {
        if !self.exists() {
            return self.save(records);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let file_len = file.metadata()?.len();

        let count = file.read_i32::<LE>()?;
        validate_header(count, file_len)?;

        file.seek(SeekFrom::Start(0))?;
        file.write_i32::<LE>(count + records.len() as i32)?;

        file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::new(file);
        for record in records {
            write_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

        debug!("appended {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    /// 删除指定 ID 的记录，通过全量重写实现
    pub fn remove(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let ids: std::collections::HashSet<i64> = ids.iter().copied().collect();
        let records = self.load(None)?;
        let before = records.len();
        let remain: Vec<EmbeddingRecord> =
            records.into_iter().filter(|r| !ids.contains(&r.id)).collect();
        let removed = before - remain.len();
        self.save(&remain)?;
        Ok(removed)
    }

    /// 读取文件头中的记录数，不加载记录本身
    pub fn count(&self) -> Result<i64, StoreError> {
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let count = file.read_i32::<LE>()?;
        validate_header(count, file_len)?;
        Ok(count as i64)
    }
}

fn validate_header(count: i32, file_len: u64) -> Result<(), StoreError> {
    if count < 0 {
        return Err(StoreError::Corrupt { count: count as i64, file_len });
    }
    let min_len = HEADER_LEN + count as u64 * MIN_RECORD_LEN;
    if min_len > file_len + CORRUPTION_SLACK {
        return Err(StoreError::Corrupt { count: count as i64, file_len });
    }
    Ok(())
}

fn write_record<W: Write>(writer: &mut W, record: &EmbeddingRecord) -> Result<(), StoreError> {
    writer.write_i64::<LE>(record.id)?;
    writer.write_i64::<LE>(record.timestamp)?;
    writer.write_i32::<LE>(record.vector.len() as i32)?;
    writer.write_all(bytemuck::cast_slice(&record.vector))?;
    Ok(())
}
