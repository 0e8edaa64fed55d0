//! Item popularity baseline.
use ndarray::{Array2, ArrayView2};

use crate::data::Sequences;
use crate::sampler::Batch;
use crate::{ItemId, PredictionError, ScoringModel, UserId};

/// Scores every item by how often it has been observed as a positive.
///
/// The score ignores the user and the context sequence, which makes it a
/// useful floor when comparing sequential models.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PopularityModel {
    counts: Vec<f32>,
}

impl PopularityModel {
    /// Create an empty model for items `1..=num_items`.
    pub fn new(num_items: usize) -> Self {
        PopularityModel {
            counts: vec![0.0; num_items + 1],
        }
    }

    /// Count every item in the training sequences.
    pub fn fit_sequences(&mut self, sequences: &Sequences) {
        for &item_id in sequences.values().flat_map(|items| items.iter()) {
            self.observe(item_id);
        }
    }

    /// Count the positive items of a sampled batch; padding is skipped.
    pub fn fit_batch(&mut self, batch: &Batch) {
        for &item_id in batch.positives.iter() {
            if item_id != 0 {
                self.observe(item_id);
            }
        }
    }

    /// Number of times `item_id` has been observed.
    pub fn count(&self, item_id: ItemId) -> f32 {
        self.counts.get(item_id).cloned().unwrap_or(0.0)
    }

    fn observe(&mut self, item_id: ItemId) {
        if item_id >= self.counts.len() {
            self.counts.resize(item_id + 1, 0.0);
        }
        self.counts[item_id] += 1.0;
    }
}

impl ScoringModel for PopularityModel {
    fn predict(
        &self,
        user_ids: &[UserId],
        sequences: ArrayView2<ItemId>,
        item_ids: &[ItemId],
    ) -> Result<Array2<f32>, PredictionError> {
        if sequences.nrows() != user_ids.len() {
            return Err(PredictionError::ShapeMismatch {
                expected: (user_ids.len(), item_ids.len()),
                actual: (sequences.nrows(), item_ids.len()),
            });
        }

        let scores: Vec<f32> = item_ids.iter().map(|&item_id| self.count(item_id)).collect();

        Ok(Array2::from_shape_fn(
            (user_ids.len(), item_ids.len()),
            |(_, idx)| scores[idx],
        ))
    }
}
