use std::io::Cursor;

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::db::{Database, PrototypeRecord, SampleRecord, crud};
use crate::provider::EmbeddingProvider;
use crate::utils::{mean_vector, now_ms};

/// 原型操作的校验错误，在任何写入发生之前被拒绝
#[derive(Debug, thiserror::Error)]
pub enum PrototypeError {
    #[error("sample list is empty")]
    EmptySamples,
    #[error("prototype name already exists: {0}")]
    DuplicateName(String),
    #[error("prototype not found: {0}")]
    PrototypeNotFound(i64),
    #[error("sample {sample_id} does not belong to prototype {prototype_id}")]
    SampleNotFound { sample_id: i64, prototype_id: i64 },
    #[error("sample embeddings have inconsistent dimensions")]
    DimensionMismatch,
}

/// 样本裁剪区域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// 宽松解析 `{"left":L,"top":T,"width":W,"height":H}`
    ///
    /// 允许出现多余字段，允许整数以浮点形式出现
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text).context("裁剪区域不是合法 JSON")?;
        let field = |name: &str| -> Result<u32> {
            let number = value.get(name).with_context(|| format!("裁剪区域缺少字段 {name}"))?;
            let n = match number {
                serde_json::Value::Number(n) => {
                    n.as_u64().or_else(|| n.as_f64().map(|f| f as u64))
                }
                _ => None,
            };
            n.map(|n| n as u32).with_context(|| format!("裁剪区域字段 {name} 不是数字"))
        };
        Ok(Self {
            left: field("left")?,
            top: field("top")?,
            width: field("width")?,
            height: field("height")?,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("crop rect serialization cannot fail")
    }
}

/// 按裁剪区域截取图片并编码为 PNG，作为嵌入模型的输入
pub fn crop_to_png(uri: &str, rect: &CropRect) -> Result<Vec<u8>> {
    let image = image::open(uri).with_context(|| format!("无法读取图片: {uri}"))?;
    let cropped = image.crop_imm(rect.left, rect.top, rect.width, rect.height);
    let mut buffer = Cursor::new(Vec::new());
    cropped.write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

/// 删除样本的结果
#[derive(Debug, PartialEq)]
pub enum RemoveOutcome {
    /// 仍有样本，质心已重新计算
    Updated { sample_count: i64 },
    /// 最后一个样本被删除，原型随之级联删除
    PrototypeDeleted,
}

/// 少样本原型的质心维护
///
/// 质心始终是全部所属样本嵌入的逐元素平均，每次样本增删后
/// 基于当前全量样本重新计算，而不是增量加权更新。
/// 质心不做重新归一化，检索端按通用余弦相似度处理
pub struct PrototypeAggregator {
    pool: Database,
}

impl PrototypeAggregator {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    /// 创建原型：裁剪并嵌入每个样本，质心取样本嵌入的平均值
    ///
    /// 样本列表不能为空（建议 3~10 个），名称必须唯一
    pub async fn create<P: EmbeddingProvider>(
        &self,
        provider: &P,
        name: &str,
        color: &str,
        description: Option<String>,
        category: Option<String>,
        samples: &[(String, CropRect)],
    ) -> Result<PrototypeRecord> {
        if samples.is_empty() {
            return Err(PrototypeError::EmptySamples.into());
        }
        if crud::get_prototype_by_name(&self.pool, name).await?.is_some() {
            return Err(PrototypeError::DuplicateName(name.to_string()).into());
        }

        let mut embeddings = Vec::with_capacity(samples.len());
        for (uri, rect) in samples {
            let png = crop_to_png(uri, rect)?;
            embeddings.push(provider.embed_image(&png).await?);
        }
        let centroid = mean_vector(&embeddings).ok_or(PrototypeError::DimensionMismatch)?;

        let now = now_ms();
        let mut record = PrototypeRecord {
            id: 0,
            name: name.to_string(),
            centroid,
            sample_count: samples.len() as i64,
            color: color.to_string(),
            description,
            category,
            created_at: now,
            updated_at: now,
        };
        record.id = crud::add_prototype(&self.pool, &record).await?;

        for ((uri, rect), embedding) in samples.iter().zip(embeddings) {
            let sample = SampleRecord {
                id: 0,
                prototype_id: record.id,
                source_uri: uri.clone(),
                crop_rect: rect.to_json(),
                embedding,
                added_at: now,
                thumbnail_path: None,
            };
            crud::add_sample(&self.pool, &sample).await?;
        }

        info!("创建原型 {} ({} 个样本)", record.name, record.sample_count);
        Ok(record)
    }

    /// 新增样本并基于全量样本重新计算质心
    pub async fn add_sample<P: EmbeddingProvider>(
        &self,
        provider: &P,
        prototype_id: i64,
        uri: &str,
        rect: &CropRect,
    ) -> Result<SampleRecord> {
        let prototype = crud::get_prototype(&self.pool, prototype_id)
            .await?
            .ok_or(PrototypeError::PrototypeNotFound(prototype_id))?;

        let png = crop_to_png(uri, rect)?;
        let embedding = provider.embed_image(&png).await?;

        let mut sample = SampleRecord {
            id: 0,
            prototype_id: prototype.id,
            source_uri: uri.to_string(),
            crop_rect: rect.to_json(),
            embedding,
            added_at: now_ms(),
            thumbnail_path: None,
        };
        sample.id = crud::add_sample(&self.pool, &sample).await?;

        self.recompute_centroid(prototype.id).await?;
        Ok(sample)
    }

    /// 删除样本；删到最后一个时级联删除原型本身
    pub async fn remove_sample(&self, sample_id: i64, prototype_id: i64) -> Result<RemoveOutcome> {
        let sample = crud::get_sample(&self.pool, sample_id).await?;
        match sample {
            Some(ref s) if s.prototype_id == prototype_id => {}
            _ => return Err(PrototypeError::SampleNotFound { sample_id, prototype_id }.into()),
        }

        crud::delete_sample(&self.pool, sample_id).await?;

        let remaining = crud::samples_for_prototype(&self.pool, prototype_id).await?;
        if remaining.is_empty() {
            crud::delete_prototype(&self.pool, prototype_id).await?;
            info!("原型 {} 的最后一个样本被删除，原型已移除", prototype_id);
            return Ok(RemoveOutcome::PrototypeDeleted);
        }

        self.recompute_centroid(prototype_id).await?;
        Ok(RemoveOutcome::Updated { sample_count: remaining.len() as i64 })
    }

    /// 删除整个原型
    pub async fn delete(&self, prototype_id: i64) -> Result<bool> {
        Ok(crud::delete_prototype(&self.pool, prototype_id).await?)
    }

    pub async fn get(&self, prototype_id: i64) -> Result<Option<PrototypeRecord>> {
        Ok(crud::get_prototype(&self.pool, prototype_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<PrototypeRecord>> {
        Ok(crud::list_prototypes(&self.pool).await?)
    }

    /// 基于当前全量样本重算质心并回写
    async fn recompute_centroid(&self, prototype_id: i64) -> Result<()> {
        let samples = crud::samples_for_prototype(&self.pool, prototype_id).await?;
        let embeddings: Vec<Vec<f32>> = samples.iter().map(|s| s.embedding.clone()).collect();
        let centroid = mean_vector(&embeddings).ok_or(PrototypeError::DimensionMismatch)?;
        crud::update_prototype_centroid(
            &self.pool,
            prototype_id,
            &centroid,
            samples.len() as i64,
            now_ms(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_rect_parse() {
        let rect = CropRect::from_json(r#"{"left":10,"top":20,"width":30,"height":40}"#).unwrap();
        assert_eq!(rect, CropRect { left: 10, top: 20, width: 30, height: 40 });
    }

    #[test]
    fn crop_rect_parse_is_permissive() {
        // 多余字段和浮点形式的整数都可以接受
        let rect =
            CropRect::from_json(r#"{"left":1.0,"top":2,"width":3,"height":4,"extra":"x"}"#).unwrap();
        assert_eq!(rect, CropRect { left: 1, top: 2, width: 3, height: 4 });

        assert!(CropRect::from_json(r#"{"left":1,"top":2,"width":3}"#).is_err());
        assert!(CropRect::from_json("not json").is_err());
    }

    #[test]
    fn crop_rect_round_trip() {
        let rect = CropRect { left: 5, top: 6, width: 7, height: 8 };
        assert_eq!(CropRect::from_json(&rect.to_json()).unwrap(), rect);
    }
}
