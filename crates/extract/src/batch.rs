use std::sync::Arc;

use futures::future::join_all;
use ingest::Chunk;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::extractor::EntityExtractor;
use crate::schema::ExtractionResult;

/// Fans chunks out to an [`EntityExtractor`] under a global concurrency cap.
pub struct BatchExtractionCoordinator {
    extractor: Arc<EntityExtractor>,
}

impl BatchExtractionCoordinator {
    pub fn new(extractor: Arc<EntityExtractor>) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &Arc<EntityExtractor> {
        &self.extractor
    }

    /// Batch size and concurrency limit taken from the extractor's config.
    pub async fn extract_all(&self, chunks: &[Chunk]) -> Vec<ExtractionResult> {
        let config = self.extractor.config();
        self.extract_batch(chunks, config.batch_size, config.concurrency_limit)
            .await
    }

    /// One result per input chunk, in input order. Chunks run in groups of
    /// `batch_size`; a group starts once the previous one has finished. At
    /// most `concurrency_limit` extractions run at once, enforced by one
    /// semaphore shared by every group. A failed chunk yields its empty
    /// `Failed` result and the rest of the batch continues.
    #[instrument(
        skip_all,
        fields(chunks = chunks.len(), batch_size = batch_size, concurrency_limit = concurrency_limit)
    )]
    pub async fn extract_batch(
        &self,
        chunks: &[Chunk],
        batch_size: usize,
        concurrency_limit: usize,
    ) -> Vec<ExtractionResult> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let semaphore = Semaphore::new(concurrency_limit.max(1));
        let semaphore = &semaphore;
        let mut results = Vec::with_capacity(chunks.len());

        for (group, members) in chunks.chunks(batch_size.max(1)).enumerate() {
            debug!(group, size = members.len(), "Dispatching extraction group");
            let pending = members.iter().map(|chunk| {
                let extractor = &self.extractor;
                async move {
                    // The semaphore is never closed, so acquire cannot fail
                    let _permit = semaphore.acquire().await.ok();
                    extractor.extract_chunk(chunk).await
                }
            });
            results.extend(join_all(pending).await);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        let cache_hits = results.iter().filter(|r| r.debug.cache_hit).count();
        let entities: usize = results.iter().map(|r| r.entities.len()).sum();
        info!(
            total = results.len(),
            failed,
            cache_hits,
            entities,
            "Batch extraction complete"
        );

        results
    }
}
