use crate::embeddings::Embedder;
use crate::traits::VectorIndex;
use crate::{Chunk, DistanceMetric, ScoredChunk, SearchError};
use async_trait::async_trait;
use std::cmp::Ordering;
use tracing::debug;

/// Exact nearest-neighbour index over owned `(chunk, vector)` pairs.
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    dimensions: usize,
    metric: DistanceMetric,
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn from_embeddings(
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, SearchError> {
        if chunks.len() != embeddings.len() {
            return Err(SearchError::CountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }

        if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimensions) {
            return Err(SearchError::Dimension {
                expected: dimensions,
                actual: bad.len(),
            });
        }

        Ok(Self {
            dimensions,
            metric,
            entries: chunks.into_iter().zip(embeddings).collect(),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn nearest(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        if query_vector.len() != self.dimensions {
            return Err(SearchError::Dimension {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|(chunk, vector)| (chunk, distance(self.metric, query_vector, vector)))
            .collect::<Vec<_>>();

        scored.sort_by(|(left_chunk, left), (right_chunk, right)| {
            left.partial_cmp(right)
                .unwrap_or(Ordering::Equal)
                .then(left_chunk.chunk_index.cmp(&right_chunk.chunk_index))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(chunk, distance)| ScoredChunk {
                chunk: chunk.clone(),
                distance,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn len(&self) -> usize {
        self.entries.len()
    }

    async fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        self.nearest(query_vector, k)
    }
}

/// Embeds every chunk and builds a fresh index from the results.
pub async fn build_index(
    chunks: Vec<Chunk>,
    embedder: &dyn Embedder,
    metric: DistanceMetric,
) -> Result<InMemoryIndex, SearchError> {
    let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
    let embeddings = embedder.embed_batch(&texts).await?;
    debug!(chunks = chunks.len(), dimensions = embedder.dimensions(), "embedded chunks");
    InMemoryIndex::from_embeddings(chunks, embeddings, embedder.dimensions(), metric)
}

fn distance(metric: DistanceMetric, left: &[f32], right: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Euclidean => left
            .iter()
            .zip(right)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt(),
        DistanceMetric::Cosine => {
            let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
            let left_norm = left.iter().map(|a| a * a).sum::<f32>().sqrt();
            let right_norm = right.iter().map(|b| b * b).sum::<f32>().sqrt();
            if left_norm == 0.0 || right_norm == 0.0 {
                1.0
            } else {
                1.0 - dot / (left_norm * right_norm)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use std::path::PathBuf;

    fn chunk(index: u64, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("chunk-{index}"),
            source_path: PathBuf::from("/tmp/doc.pdf"),
            file_name: "doc.pdf".to_string(),
            chunk_index: index,
            start_offset: 0,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn nearest_chunks_come_first() -> Result<(), SearchError> {
        let index = InMemoryIndex::from_embeddings(
            vec![chunk(0, "far"), chunk(1, "near"), chunk(2, "middle")],
            vec![vec![10.0, 0.0], vec![1.0, 0.0], vec![4.0, 0.0]],
            2,
            DistanceMetric::Euclidean,
        )?;

        let hits = index.search(&[0.0, 0.0], 2).await?;
        let texts = hits.iter().map(|hit| hit.chunk.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["near", "middle"]);
        assert!((hits[0].distance - 1.0).abs() < f32::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn cosine_metric_ignores_magnitude() -> Result<(), SearchError> {
        let index = InMemoryIndex::from_embeddings(
            vec![chunk(0, "same direction"), chunk(1, "orthogonal")],
            vec![vec![5.0, 5.0], vec![1.0, -1.0]],
            2,
            DistanceMetric::Cosine,
        )?;

        let hits = index.search(&[1.0, 1.0], 1).await?;
        assert_eq!(hits[0].chunk.text, "same direction");
        Ok(())
    }

    #[tokio::test]
    async fn ties_keep_chunk_order() -> Result<(), SearchError> {
        let index = InMemoryIndex::from_embeddings(
            vec![chunk(1, "b"), chunk(0, "a")],
            vec![vec![1.0], vec![1.0]],
            1,
            DistanceMetric::Euclidean,
        )?;

        let hits = index.search(&[0.0], 4).await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 0);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_returns_nothing() -> Result<(), SearchError> {
        let index = build_index(Vec::new(), &CharacterNgramEmbedder::default(), DistanceMetric::Euclidean).await?;
        assert!(index.is_empty());
        assert!(index.search(&vec![0.0; index.dimensions()], 4).await?.is_empty());
        Ok(())
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let counts = InMemoryIndex::from_embeddings(
            vec![chunk(0, "a")],
            Vec::new(),
            2,
            DistanceMetric::Euclidean,
        );
        assert!(matches!(counts, Err(SearchError::CountMismatch { .. })));

        let dims = InMemoryIndex::from_embeddings(
            vec![chunk(0, "a")],
            vec![vec![1.0]],
            2,
            DistanceMetric::Euclidean,
        );
        assert!(matches!(dims, Err(SearchError::Dimension { expected: 2, actual: 1 })));
    }

    #[tokio::test]
    async fn wrong_query_dimension_is_an_error() -> Result<(), SearchError> {
        let index = build_index(
            vec![chunk(0, "pump pressure")],
            &CharacterNgramEmbedder { dimensions: 16 },
            DistanceMetric::Euclidean,
        )
        .await?;

        assert!(index.search(&[0.0; 4], 1).await.is_err());
        Ok(())
    }
}
