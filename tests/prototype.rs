use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tempfile::TempDir;

use semsearch::db::{Database, crud, init_db};
use semsearch::prototype::{CropRect, PrototypeAggregator, RemoveOutcome};
use semsearch::provider::EmbeddingProvider;

/// 按预先排好的队列依次返回嵌入向量
struct QueueProvider {
    queue: Mutex<VecDeque<Vec<f32>>>,
}

impl QueueProvider {
    fn new(vectors: impl IntoIterator<Item = Vec<f32>>) -> Self {
        Self { queue: Mutex::new(vectors.into_iter().collect()) }
    }
}

impl EmbeddingProvider for QueueProvider {
    async fn embed_image(&self, _data: &[u8]) -> Result<Vec<f32>> {
        self.queue.lock().unwrap().pop_front().context("queue exhausted")
    }

    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.0, 0.0])
    }
}

async fn setup() -> Result<(TempDir, Database, String)> {
    let dir = TempDir::new()?;
    let db = init_db(dir.path().join("semsearch.db")).await?;

    let image_path = dir.path().join("sample.png");
    image::RgbaImage::new(8, 8).save(&image_path)?;
    let uri = image_path.to_str().unwrap().to_string();

    Ok((dir, db, uri))
}

fn rect() -> CropRect {
    CropRect { left: 0, top: 0, width: 4, height: 4 }
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-6, "expected {expected:?}, got {actual:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn centroid_is_mean_of_sample_embeddings() -> Result<()> {
    let (_dir, db, uri) = setup().await?;
    let aggregator = PrototypeAggregator::new(db.clone());

    let provider = QueueProvider::new([vec![1.0, 0.0], vec![0.0, 1.0]]);
    let samples = vec![(uri.clone(), rect()), (uri.clone(), rect())];
    let prototype =
        aggregator.create(&provider, "logo", "#4e9a06", None, None, &samples).await?;

    assert_eq!(prototype.sample_count, 2);
    assert_close(&prototype.centroid, &[0.5, 0.5]);

    let stored = crud::get_prototype_by_name(&db, "logo").await?.unwrap();
    assert_close(&stored.centroid, &[0.5, 0.5]);
    assert_eq!(crud::samples_for_prototype(&db, prototype.id).await?.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn add_sample_recomputes_over_all_samples() -> Result<()> {
    let (_dir, db, uri) = setup().await?;
    let aggregator = PrototypeAggregator::new(db.clone());

    let provider = QueueProvider::new([vec![1.0, 0.0], vec![0.0, 1.0]]);
    let prototype = aggregator
        .create(&provider, "logo", "#4e9a06", None, None, &[(uri.clone(), rect()), (uri.clone(), rect())])
        .await?;

    let provider = QueueProvider::new([vec![1.0, 1.0]]);
    aggregator.add_sample(&provider, prototype.id, &uri, &rect()).await?;

    let updated = aggregator.get(prototype.id).await?.unwrap();
    assert_eq!(updated.sample_count, 3);
    assert_close(&updated.centroid, &[2.0 / 3.0, 2.0 / 3.0]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_last_sample_deletes_prototype() -> Result<()> {
    let (_dir, db, uri) = setup().await?;
    let aggregator = PrototypeAggregator::new(db.clone());

    let provider = QueueProvider::new([vec![1.0, 0.0], vec![0.0, 1.0]]);
    let prototype = aggregator
        .create(&provider, "logo", "#4e9a06", None, None, &[(uri.clone(), rect()), (uri.clone(), rect())])
        .await?;

    let samples = crud::samples_for_prototype(&db, prototype.id).await?;
    assert_eq!(samples.len(), 2);

    let outcome = aggregator.remove_sample(samples[0].id, prototype.id).await?;
    assert_eq!(outcome, RemoveOutcome::Updated { sample_count: 1 });
    let updated = aggregator.get(prototype.id).await?.unwrap();
    assert_close(&updated.centroid, &[0.0, 1.0]);

    let outcome = aggregator.remove_sample(samples[1].id, prototype.id).await?;
    assert_eq!(outcome, RemoveOutcome::PrototypeDeleted);
    assert!(aggregator.get(prototype.id).await?.is_none());
    assert!(crud::samples_for_prototype(&db, prototype.id).await?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejects_empty_samples_and_duplicate_names() -> Result<()> {
    let (_dir, db, uri) = setup().await?;
    let aggregator = PrototypeAggregator::new(db.clone());

    let provider = QueueProvider::new([vec![1.0, 0.0]]);
    assert!(aggregator.create(&provider, "logo", "#4e9a06", None, None, &[]).await.is_err());

    aggregator
        .create(&provider, "logo", "#4e9a06", None, None, &[(uri.clone(), rect())])
        .await?;

    // 重名在任何写入前被拒绝
    let provider = QueueProvider::new([vec![0.0, 1.0]]);
    assert!(
        aggregator
            .create(&provider, "logo", "#4e9a06", None, None, &[(uri.clone(), rect())])
            .await
            .is_err()
    );
    assert_eq!(aggregator.list().await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_sample_requires_matching_prototype() -> Result<()> {
    let (_dir, db, uri) = setup().await?;
    let aggregator = PrototypeAggregator::new(db.clone());

    let provider = QueueProvider::new([vec![1.0, 0.0]]);
    let prototype = aggregator
        .create(&provider, "logo", "#4e9a06", None, None, &[(uri.clone(), rect())])
        .await?;
    let samples = crud::samples_for_prototype(&db, prototype.id).await?;

    assert!(aggregator.remove_sample(samples[0].id, prototype.id + 1).await.is_err());
    assert!(aggregator.get(prototype.id).await?.is_some());
    Ok(())
}
