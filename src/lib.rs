#![deny(missing_docs)]
//! # sasrec-data
//!
//! `sasrec_data` prepares implicit-feedback sequences for training
//! sequential recommenders: it splits every user's history into
//! train/validation/test segments, produces negative-sampled minibatches
//! on a pool of background threads, and evaluates a model with the
//! leave-one-out ranking protocol (one held-out item against 100 sampled
//! negatives).
//!
//! ## Example
//! Fit a popularity baseline on sampled minibatches and evaluate it:
//!
//! ```rust
//! # extern crate rand;
//! # extern crate rand_xorshift;
//! # extern crate sasrec_data;
//! # use rand::SeedableRng;
//! use sasrec_data::data::{data_partition, Interaction, Interactions};
//! use sasrec_data::evaluation::{evaluate, EvaluationConfig, EvaluationSplit};
//! use sasrec_data::models::popularity::PopularityModel;
//! use sasrec_data::sampler::{SamplerConfig, WarpSampler};
//!
//! let interactions: Interactions = (1..=20)
//!     .flat_map(|user| (0..6).map(move |step| Interaction::new(user, 1 + (user + step) % 30)))
//!     .collect::<Vec<_>>()
//!     .into();
//! let partition = data_partition(&interactions).unwrap();
//!
//! let config = SamplerConfig::new(8, 5).num_workers(2).seed(42);
//! let mut sampler = WarpSampler::new(
//!     &partition.train,
//!     partition.num_users,
//!     partition.num_items,
//!     &config,
//! ).unwrap();
//!
//! let mut model = PopularityModel::new(partition.num_items);
//! for _ in 0..10 {
//!     model.fit_batch(&sampler.next_batch().unwrap());
//! }
//! sampler.close();
//!
//! let mut rng = rand_xorshift::XorShiftRng::seed_from_u64(42);
//! let metrics = evaluate(
//!     &model,
//!     &partition,
//!     EvaluationSplit::Test,
//!     &EvaluationConfig::new(5),
//!     &mut rng,
//! ).unwrap();
//!
//! assert!(metrics.hit_rate_at_5 <= metrics.hit_rate_at_10);
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

extern crate failure;
extern crate ndarray;
extern crate rand;
extern crate rand_xorshift;
extern crate serde;
extern crate tracing;

use failure::Fail;
use ndarray::{Array2, ArrayView2};

pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod models;
pub mod sampler;
pub mod sampling;

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices. Item `0` is reserved for padding.
pub type ItemId = usize;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The model returned a score matrix of the wrong shape.
    #[fail(
        display = "Expected predictions of shape {:?}, got {:?}.",
        expected, actual
    )]
    ShapeMismatch {
        /// Shape the caller asked for: (users, candidates).
        expected: (usize, usize),
        /// Shape the model returned.
        actual: (usize, usize),
    },
}

/// Trait describing models that score candidate items given a user's
/// left-padded sequence of past interactions.
///
/// This is the only capability the evaluator needs from a model.
pub trait ScoringModel {
    /// Score `item_ids` for every row of `sequences`.
    ///
    /// `user_ids` and `sequences` have one entry (row) per user; the result
    /// must have shape `(user_ids.len(), item_ids.len())`. Higher scores
    /// mean more relevant items.
    fn predict(
        &self,
        user_ids: &[UserId],
        sequences: ArrayView2<ItemId>,
        item_ids: &[ItemId],
    ) -> Result<Array2<f32>, PredictionError>;
}
