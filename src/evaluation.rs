//! Leave-one-out ranking evaluation.
//!
//! Every evaluated user gets one ranking task: the held-out item plus
//! `num_negatives` items sampled from outside the user's training history.
//! The model scores all candidates and the rank of the held-out item feeds
//! NDCG@5, NDCG@10, HR@5, HR@10 and MRR.
use std::collections::{BTreeMap, HashSet};

use failure::Fail;
use ndarray::Array2;
use rand::Rng;
use tracing::{debug, info};

use super::data::{Partition, Sequences};
use super::sampling::NegativeSampler;
use super::{ItemId, PredictionError, ScoringModel, UserId};

/// Evaluation error types.
#[derive(Debug, Fail)]
pub enum EvaluationError {
    /// No user had both a context history and a held-out item.
    #[fail(display = "No users could be evaluated.")]
    NoEvaluableUsers,
    /// A user's training items cover the whole item range.
    #[fail(
        display = "User {} has interacted with every item; cannot draw negatives.",
        user_id
    )]
    ExhaustedItemRange {
        /// The offending user.
        user_id: UserId,
    },
    /// Invalid configuration value.
    #[fail(display = "Invalid evaluation configuration: {}", _0)]
    InvalidConfig(&'static str),
    /// The model failed to score the candidates.
    #[fail(display = "Prediction failed: {}", _0)]
    Prediction(#[cause] PredictionError),
}

impl From<PredictionError> for EvaluationError {
    fn from(err: PredictionError) -> Self {
        EvaluationError::Prediction(err)
    }
}

/// Which held-out item to rank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationSplit {
    /// Rank the second-to-last item given the training history.
    Validation,
    /// Rank the last item given the training history followed by the
    /// validation item.
    Test,
}

/// Evaluation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationConfig {
    max_sequence_length: usize,
    num_negatives: usize,
    max_users: usize,
    progress_interval: usize,
}

impl EvaluationConfig {
    /// 100 negatives per user, at most 10000 sampled users.
    pub fn new(max_sequence_length: usize) -> Self {
        EvaluationConfig {
            max_sequence_length,
            num_negatives: 100,
            max_users: 10_000,
            progress_interval: 100,
        }
    }

    /// Set the number of sampled negatives per user.
    pub fn num_negatives(mut self, num_negatives: usize) -> Self {
        self.num_negatives = num_negatives;
        self
    }

    /// Evaluate a random subset of this many users when there are more.
    pub fn max_users(mut self, max_users: usize) -> Self {
        self.max_users = max_users;
        self
    }

    /// Log progress every `progress_interval` users; 0 disables it.
    pub fn progress_interval(mut self, progress_interval: usize) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    fn validate(&self) -> Result<(), EvaluationError> {
        if self.max_sequence_length == 0 {
            return Err(EvaluationError::InvalidConfig(
                "max_sequence_length must be positive",
            ));
        }
        if self.max_users == 0 {
            return Err(EvaluationError::InvalidConfig("max_users must be positive"));
        }

        Ok(())
    }
}

/// Ranking metrics averaged over evaluated users.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// NDCG at cutoff 5.
    #[serde(rename = "NDCG@5")]
    pub ndcg_at_5: f64,
    /// NDCG at cutoff 10.
    #[serde(rename = "NDCG@10")]
    pub ndcg_at_10: f64,
    /// Hit rate at cutoff 5.
    #[serde(rename = "HR@5")]
    pub hit_rate_at_5: f64,
    /// Hit rate at cutoff 10.
    #[serde(rename = "HR@10")]
    pub hit_rate_at_10: f64,
    /// Reciprocal rank, counted only within the top 10.
    #[serde(rename = "MRR")]
    pub mrr: f64,
    /// Number of users the averages are taken over.
    #[serde(skip)]
    pub num_users: usize,
}

impl Metrics {
    /// The metrics keyed by their conventional names.
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        let mut map = BTreeMap::new();
        map.insert("NDCG@5", self.ndcg_at_5);
        map.insert("NDCG@10", self.ndcg_at_10);
        map.insert("HR@5", self.hit_rate_at_5);
        map.insert("HR@10", self.hit_rate_at_10);
        map.insert("MRR", self.mrr);
        map
    }
}

#[derive(Debug, Default)]
struct MetricsAccumulator {
    ndcg_at_5: f64,
    ndcg_at_10: f64,
    hit_rate_at_5: f64,
    hit_rate_at_10: f64,
    mrr: f64,
    num_users: usize,
}

impl MetricsAccumulator {
    fn add(&mut self, rank: usize) {
        self.num_users += 1;

        let gain = 1.0 / ((rank + 2) as f64).log2();

        if rank < 5 {
            self.ndcg_at_5 += gain;
            self.hit_rate_at_5 += 1.0;
        }

        if rank < 10 {
            self.ndcg_at_10 += gain;
            self.hit_rate_at_10 += 1.0;
            self.mrr += 1.0 / (rank + 1) as f64;
        }
    }

    fn finish(self) -> Result<Metrics, EvaluationError> {
        if self.num_users == 0 {
            return Err(EvaluationError::NoEvaluableUsers);
        }

        let denominator = self.num_users as f64;

        Ok(Metrics {
            ndcg_at_5: self.ndcg_at_5 / denominator,
            ndcg_at_10: self.ndcg_at_10 / denominator,
            hit_rate_at_5: self.hit_rate_at_5 / denominator,
            hit_rate_at_10: self.hit_rate_at_10 / denominator,
            mrr: self.mrr / denominator,
            num_users: self.num_users,
        })
    }
}

/// The sequences one evaluation pass reads from.
#[derive(Clone, Copy, Debug)]
pub struct EvaluationSets<'a> {
    /// Histories laid into the context window.
    pub context: &'a Sequences,
    /// Held-out items; the first one is ranked.
    pub targets: &'a Sequences,
    /// Optional item appended after the history (test mode).
    pub extra_context: Option<&'a Sequences>,
    /// Largest user id.
    pub num_users: usize,
    /// Largest item id.
    pub num_items: usize,
}

impl<'a> EvaluationSets<'a> {
    /// Select the sequences for `split`.
    pub fn from_partition(partition: &'a Partition, split: EvaluationSplit) -> Self {
        let (targets, extra_context) = match split {
            EvaluationSplit::Validation => (&partition.valid, None),
            EvaluationSplit::Test => (&partition.test, Some(&partition.valid)),
        };

        EvaluationSets {
            context: &partition.train,
            targets,
            extra_context,
            num_users: partition.num_users,
            num_items: partition.num_items,
        }
    }
}

/// Evaluate `model` on the validation or test split of `partition`.
pub fn evaluate<M: ScoringModel, R: Rng>(
    model: &M,
    partition: &Partition,
    split: EvaluationSplit,
    config: &EvaluationConfig,
    rng: &mut R,
) -> Result<Metrics, EvaluationError> {
    let metrics = evaluate_sets(
        model,
        &EvaluationSets::from_partition(partition, split),
        config,
        rng,
    )?;

    info!(
        ?split,
        users = metrics.num_users,
        ndcg_at_10 = metrics.ndcg_at_10,
        hit_rate_at_10 = metrics.hit_rate_at_10,
        mrr = metrics.mrr,
        "evaluation finished"
    );

    Ok(metrics)
}

/// Rank the first target item of every user against sampled negatives.
///
/// Users without a context history, a target, or (when `extra_context` is
/// given) an extra item are skipped.
pub fn evaluate_sets<M: ScoringModel, R: Rng>(
    model: &M,
    sets: &EvaluationSets,
    config: &EvaluationConfig,
    rng: &mut R,
) -> Result<Metrics, EvaluationError> {
    config.validate()?;

    if sets.num_items == 0 {
        return Err(EvaluationError::InvalidConfig("num_items must be positive"));
    }

    let negatives = NegativeSampler::for_items(sets.num_items);
    let mut accumulator = MetricsAccumulator::default();

    for user_id in sample_users(sets.num_users, config.max_users, rng) {
        let history = match sets.context.get(&user_id) {
            Some(history) if !history.is_empty() => history,
            _ => continue,
        };
        let target = match sets.targets.get(&user_id).and_then(|items| items.first()) {
            Some(&target) => target,
            None => continue,
        };
        let extra = match sets.extra_context {
            Some(extra) => match extra.get(&user_id).and_then(|items| items.first()) {
                Some(&item) => Some(item),
                None => continue,
            },
            None => None,
        };

        let sequence = context_sequence(history, extra, config.max_sequence_length);

        // Not updated while drawing: negatives may repeat.
        let mut rated: HashSet<ItemId> = history.iter().cloned().collect();
        rated.insert(0);

        if !negatives.can_sample(&rated) {
            return Err(EvaluationError::ExhaustedItemRange { user_id });
        }

        let mut candidates = Vec::with_capacity(config.num_negatives + 1);
        candidates.push(target);
        for _ in 0..config.num_negatives {
            candidates.push(negatives.draw(rng, &rated));
        }

        let predictions = model.predict(&[user_id], sequence.view(), &candidates)?;

        if predictions.dim() != (1, candidates.len()) {
            return Err(PredictionError::ShapeMismatch {
                expected: (1, candidates.len()),
                actual: predictions.dim(),
            }
            .into());
        }

        let scores = predictions.row(0).to_vec();

        if scores.iter().any(|score| !score.is_finite()) {
            return Err(PredictionError::InvalidPredictionValue.into());
        }

        accumulator.add(target_rank(&scores));

        if config.progress_interval > 0 && accumulator.num_users % config.progress_interval == 0 {
            debug!(users = accumulator.num_users, "evaluation progress");
        }
    }

    accumulator.finish()
}

/// Users to evaluate: everyone, or a uniform sample without replacement
/// once there are more than `max_users`.
fn sample_users<R: Rng>(num_users: usize, max_users: usize, rng: &mut R) -> Vec<UserId> {
    if num_users > max_users {
        rand::seq::index::sample(rng, num_users, max_users)
            .into_iter()
            .map(|idx| idx + 1)
            .collect()
    } else {
        (1..=num_users).collect()
    }
}

/// A single right-aligned context row, most recent item last.
fn context_sequence(
    history: &[ItemId],
    extra: Option<ItemId>,
    max_sequence_length: usize,
) -> Array2<ItemId> {
    let mut sequence = Array2::zeros((1, max_sequence_length));
    let mut end = max_sequence_length;

    if let Some(item) = extra {
        sequence[[0, end - 1]] = item;
        end -= 1;
    }

    for (idx, &item) in izip!((0..end).rev(), history.iter().rev()) {
        sequence[[0, idx]] = item;
    }

    sequence
}

/// Rank of the first score among all scores, 0 being the highest.
///
/// Every other score greater than or equal to the first one counts against
/// it, so ties rank the first score last among its equals.
pub fn target_rank(scores: &[f32]) -> usize {
    match scores.split_first() {
        Some((target, others)) => others.iter().filter(|&score| score >= target).count(),
        None => 0,
    }
}
