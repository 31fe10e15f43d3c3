use anyhow::Result;
use log::debug;

use crate::db::{Database, MediaTagAssignment, crud};
use crate::store::EmbeddingRecord;
use crate::utils::cosine_similarity;

/// 阈值化的自动打标
///
/// 对每个启用的标签计算媒体嵌入与标签嵌入的余弦相似度，达到该标签
/// 阈值的生成一条自动关联。每次打标前先删除该媒体已有的自动关联，
/// 用户手动指定的关联不受影响，因此重复打标是幂等的
pub struct Tagger {
    pool: Database,
}

impl Tagger {
    pub fn new(pool: Database) -> Self {
        Self { pool }
    }

    /// 为单个媒体打标，返回新生成的自动关联
    pub async fn assign(&self, media_id: i64, embedding: &[f32]) -> Result<Vec<MediaTagAssignment>> {
        let tags = crud::list_tags(&self.pool, true).await?;

        let assignments: Vec<MediaTagAssignment> = tags
            .iter()
            .filter_map(|tag| {
                let similarity = cosine_similarity(embedding, &tag.embedding);
                (similarity >= tag.threshold).then(|| MediaTagAssignment {
                    media_id,
                    tag_name: tag.name.clone(),
                    confidence: similarity,
                    is_user_assigned: false,
                })
            })
            .collect();

        let mut tx = self.pool.begin().await?;
        crud::delete_auto_assignments(&mut tx, media_id).await?;
        for assignment in &assignments {
            crud::add_assignment(&mut tx, assignment).await?;
        }
        tx.commit().await?;

        debug!("media {} assigned {} tags", media_id, assignments.len());
        Ok(assignments)
    }

    /// 顺序为一批媒体打标，每处理一个回调一次进度
    pub async fn assign_batch<F>(
        &self,
        items: &[(i64, Vec<f32>)],
        mut on_progress: F,
    ) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        let total = items.len();
        let mut assigned = 0;
        for (current, (media_id, embedding)) in items.iter().enumerate() {
            assigned += self.assign(*media_id, embedding).await?.len();
            on_progress(current + 1, total);
        }
        Ok(assigned)
    }

    /// 对整个存储快照重新打标，用于标签嵌入或阈值变化之后
    pub async fn retag_all<F>(&self, records: &[EmbeddingRecord], on_progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        let items: Vec<(i64, Vec<f32>)> =
            records.iter().map(|r| (r.id, r.vector.clone())).collect();
        self.assign_batch(&items, on_progress).await
    }
}
