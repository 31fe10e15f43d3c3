use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// 外部嵌入模型
///
/// 模型本身不在本 crate 范围内，只约定 `embed(输入) -> 向量` 的调用面；
/// 返回的向量假定已被归一化为单位长度
pub trait EmbeddingProvider: Send + Sync {
    /// 为一段图片字节生成嵌入向量
    fn embed_image(&self, data: &[u8]) -> impl Future<Output = Result<Vec<f32>>> + Send;
    /// 为一段文本生成嵌入向量
    fn embed_text(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

#[derive(Deserialize)]
struct EmbedResponse {
    vector: Vec<f32>,
}

/// 通过 HTTP 访问嵌入服务的 provider
///
/// POST {base}/embed/image 上传图片字节，POST {base}/embed/text 上传 JSON 文本，
/// 响应均为 `{"vector": [...]}`
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

impl EmbeddingProvider for HttpProvider {
    async fn embed_image(&self, data: &[u8]) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embed/image", self.base_url))
            .header("Content-Type", "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .context("嵌入服务不可用")?
            .error_for_status()?
            .json::<EmbedResponse>()
            .await?;
        Ok(response.vector)
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embed/text", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .context("嵌入服务不可用")?
            .error_for_status()?
            .json::<EmbedResponse>()
            .await?;
        Ok(response.vector)
    }
}

/// 判断一条媒体记录是否仍然可以被解析到实际文件
pub trait MediaResolver {
    fn can_resolve(&self, id: i64) -> bool;
}

/// 基于媒体注册表路径的解析器
pub struct PathResolver {
    paths: HashMap<i64, PathBuf>,
}

impl PathResolver {
    pub fn new(entries: impl IntoIterator<Item = (i64, String)>) -> Self {
        Self { paths: entries.into_iter().map(|(id, path)| (id, PathBuf::from(path))).collect() }
    }
}

impl MediaResolver for PathResolver {
    fn can_resolve(&self, id: i64) -> bool {
        self.paths.get(&id).map(|path| path.exists()).unwrap_or(false)
    }
}

/// 永远可解析，查询时不做失效剔除
pub struct ResolveAll;

impl MediaResolver for ResolveAll {
    fn can_resolve(&self, _id: i64) -> bool {
        true
    }
}
