//! Models module.
//!
//! Neural sequence models live outside this crate and plug into the
//! evaluator through [`ScoringModel`](super::ScoringModel); the models here
//! are baselines.
pub mod popularity;
