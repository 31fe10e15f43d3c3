use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

/// 计算文件的 blake3 哈希
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut file = std::fs::File::open(path.as_ref())?;
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// 当前 Unix 时间戳，毫秒
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// 将 f32 向量序列化为小端字节串，用于 sqlite BLOB 存储
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(vector).to_vec()
}

/// 从 BLOB 还原 f32 向量，兼容未对齐的字节串
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec(blob)
}

/// 向量集合的逐元素平均值
///
/// 所有向量维数必须一致，空集合或维数不一致时返回 None
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut mean = vec![0f32; dim];
    for vector in vectors {
        for (acc, v) in mean.iter_mut().zip(vector) {
            *acc += v;
        }
    }
    let n = vectors.len() as f32;
    for acc in &mut mean {
        *acc /= n;
    }
    Some(mean)
}

/// 余弦相似度，任意一方模长为 0 时返回 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0. || norm_b == 0. {
        return 0.;
    }
    dot / (norm_a * norm_b)
}
