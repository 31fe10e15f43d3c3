use log::debug;
use rayon::prelude::*;

use crate::provider::MediaResolver;
use crate::store::{EmbeddingRecord, StoreError, VectorStore};
use crate::utils::cosine_similarity;

/// 检索错误
#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    /// 尚未执行过完整查询，没有可供翻页的排序结果
    #[error("no cached ranking: run a full query first")]
    NotInitialized,
}

/// 一条打分结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: i64,
    pub score: f32,
}

/// 一次完整查询的结果
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// 前 limit 条结果，按相似度降序
    pub results: Vec<ScoredId>,
    /// 达到阈值的结果总数，用于翻页
    pub total_matches: usize,
    /// 命中结果中已无法解析的媒体 ID，调用方应从存储中批量删除
    pub stale: Vec<i64>,
}

/// 线性扫描相似度检索
///
/// 持有一份存储快照；存储内的向量假定为单位长度，但查询向量
/// （尤其是原型质心）不一定是，因此统一按余弦相似度计算。
/// 完整查询会缓存整个排序结果，`query_range` 在其上翻页，
/// 保证连续的范围调用返回同一份稳定排序的延续
pub struct SimilarityRetriever {
    records: Vec<EmbeddingRecord>,
    ranking: Option<Vec<ScoredId>>,
}

impl SimilarityRetriever {
    pub fn new(records: Vec<EmbeddingRecord>) -> Self {
        Self { records, ranking: None }
    }

    /// 从存储加载快照
    pub fn from_store(store: &VectorStore, require_dim: Option<usize>) -> Result<Self, StoreError> {
        Ok(Self::new(store.load(require_dim)?))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 完整查询：对每条记录计算相似度，保留达到阈值的结果并降序排序
    ///
    /// 相同分数按存储内原始顺序稳定排序。无法解析的媒体会被剔除出
    /// 结果并记录在 `stale` 中返回
    pub fn query<R: MediaResolver>(
        &mut self,
        query: &[f32],
        limit: usize,
        threshold: f32,
        resolver: &R,
    ) -> QueryOutcome {
        let mut matches: Vec<(usize, ScoredId)> = self
            .records
            .par_iter()
            .enumerate()
            .filter_map(|(index, record)| {
                let score = cosine_similarity(query, &record.vector);
                (score >= threshold).then_some((index, ScoredId { id: record.id, score }))
            })
            .collect();

        matches.sort_by(|a, b| b.1.score.total_cmp(&a.1.score).then(a.0.cmp(&b.0)));

        let mut stale = Vec::new();
        let ranked: Vec<ScoredId> = matches
            .into_iter()
            .map(|(_, scored)| scored)
            .filter(|scored| {
                if resolver.can_resolve(scored.id) {
                    true
                } else {
                    stale.push(scored.id);
                    false
                }
            })
            .collect();

        debug!("query matched {} of {} records, {} stale", ranked.len(), self.records.len(), stale.len());

        let total_matches = ranked.len();
        let results = ranked.iter().take(limit).copied().collect();
        self.ranking = Some(ranked);

        QueryOutcome { results, total_matches, stale }
    }

    /// 在上一次完整查询的排序结果上取 [start, end) 区间，用于加载更多
    pub fn query_range(&self, start: usize, end: usize) -> Result<Vec<ScoredId>, RetrieveError> {
        let ranking = self.ranking.as_ref().ok_or(RetrieveError::NotInitialized)?;
        let start = start.min(ranking.len());
        let end = end.clamp(start, ranking.len());
        Ok(ranking[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResolveAll;

    fn record(id: i64, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord { id, timestamp: 0, vector }
    }

    fn retriever() -> SimilarityRetriever {
        // 相对查询向量 [1, 0]：a=1.0, b≈0.5 (60°), c=0.0
        SimilarityRetriever::new(vec![
            record(3, vec![0., 1.]),
            record(1, vec![1., 0.]),
            record(2, vec![0.5, 0.75f32.sqrt()]),
        ])
    }

    #[test]
    fn similarity_ordering() {
        let mut r = retriever();
        let outcome = r.query(&[1., 0.], 3, 0., &ResolveAll);
        let ids: Vec<i64> = outcome.results.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!((outcome.results[0].score - 1.0).abs() < 1e-6);
        assert!((outcome.results[1].score - 0.5).abs() < 1e-6);
        assert!(outcome.results[2].score.abs() < 1e-6);
        assert_eq!(outcome.total_matches, 3);
    }

    #[test]
    fn threshold_excludes_low_scores() {
        let mut r = retriever();
        let outcome = r.query(&[1., 0.], 3, 0.4, &ResolveAll);
        let ids: Vec<i64> = outcome.results.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(outcome.total_matches, 2);
    }

    #[test]
    fn limit_truncates_but_total_counts_all() {
        let mut r = retriever();
        let outcome = r.query(&[1., 0.], 1, 0., &ResolveAll);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, 1);
        assert_eq!(outcome.total_matches, 3);
    }

    #[test]
    fn pagination_is_consistent() {
        let mut records = vec![];
        for id in 0..30 {
            let angle = id as f32 * 0.05;
            records.push(record(id, vec![angle.cos(), angle.sin()]));
        }
        let mut r = SimilarityRetriever::new(records);
        r.query(&[1., 0.], 5, -1., &ResolveAll);

        let first = r.query_range(0, 10).unwrap();
        let second = r.query_range(10, 20).unwrap();
        let full = r.query_range(0, 20).unwrap();

        let mut joined = first;
        joined.extend(second);
        assert_eq!(joined, full);
    }

    #[test]
    fn range_without_query_is_error() {
        let r = retriever();
        assert!(matches!(r.query_range(0, 10), Err(RetrieveError::NotInitialized)));
    }

    #[test]
    fn stable_tie_break_follows_store_order() {
        let mut r = SimilarityRetriever::new(vec![
            record(9, vec![1., 0.]),
            record(4, vec![1., 0.]),
            record(7, vec![1., 0.]),
        ]);
        let outcome = r.query(&[1., 0.], 3, 0., &ResolveAll);
        let ids: Vec<i64> = outcome.results.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![9, 4, 7]);
    }

    #[test]
    fn stale_ids_are_excluded_and_reported() {
        struct OddOnly;
        impl MediaResolver for OddOnly {
            fn can_resolve(&self, id: i64) -> bool {
                id % 2 == 1
            }
        }

        let mut r = retriever();
        let outcome = r.query(&[1., 0.], 3, 0., &OddOnly);
        let ids: Vec<i64> = outcome.results.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(outcome.stale, vec![2]);
        assert_eq!(outcome.total_matches, 2);
    }

    #[test]
    fn centroid_query_not_unit_length() {
        // 原型质心不是单位向量，余弦相似度仍然应当正确归一
        let mut r = retriever();
        let outcome = r.query(&[0.5, 0.], 1, 0.9, &ResolveAll);
        assert_eq!(outcome.results[0].id, 1);
        assert!((outcome.results[0].score - 1.0).abs() < 1e-6);
    }
}
