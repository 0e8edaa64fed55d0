//! Asynchronous negative-sampled minibatches.
//!
//! A [`WarpSampler`] runs a pool of [`BatchProducer`]s on background
//! threads. Every producer owns its own seeded random number generator and
//! pushes complete minibatches onto one bounded queue; the training loop
//! pulls them with [`WarpSampler::next_batch`].
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use failure::Fail;
use ndarray::{Array2, ArrayViewMut1};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use tracing::{debug, info, warn};

use super::data::Sequences;
use super::sampling::NegativeSampler;
use super::{ItemId, UserId};

/// Sampler error types.
#[derive(Debug, Fail)]
pub enum SamplerError {
    /// No user has more than one training interaction.
    #[fail(display = "No valid users with sequence length > 1.")]
    NoValidUsers,
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
    #[fail(display = "Invalid sampler configuration: {}", _0)]
    InvalidConfig(&'static str),
    /// A worker thread could not be started.
    #[fail(display = "Failed to spawn sampling worker: {}", _0)]
    Spawn(#[cause] io::Error),
    /// `next_batch` was called after `close`.
    #[fail(display = "The sampler has been closed.")]
    Closed,
    /// Every worker exited before producing the next batch.
    #[fail(display = "All sampling workers have exited.")]
    Disconnected,
}

/// Sampler parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    batch_size: usize,
    max_sequence_length: usize,
    num_workers: usize,
    queue_factor: usize,
    seed: Option<u64>,
}

impl SamplerConfig {
    /// Default configuration: one worker, a queue of ten batches per
    /// worker, and a seed drawn from the thread-local generator.
    pub fn new(batch_size: usize, max_sequence_length: usize) -> Self {
        SamplerConfig {
            batch_size,
            max_sequence_length,
            num_workers: 1,
            queue_factor: 10,
            seed: None,
        }
    }

    /// Set the number of worker threads.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set the number of queued batches allowed per worker.
    pub fn queue_factor(mut self, queue_factor: usize) -> Self {
        self.queue_factor = queue_factor;
        self
    }

    /// Seed the generator that derives worker seeds.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Capacity of the shared batch queue.
    pub fn queue_capacity(&self) -> usize {
        self.queue_factor * self.num_workers
    }

    fn validate(&self) -> Result<(), SamplerError> {
        if self.batch_size == 0 {
            return Err(SamplerError::InvalidConfig("batch_size must be positive"));
        }
        if self.max_sequence_length == 0 {
            return Err(SamplerError::InvalidConfig(
                "max_sequence_length must be positive",
            ));
        }
        if self.num_workers == 0 {
            return Err(SamplerError::InvalidConfig("num_workers must be positive"));
        }
        if self.queue_factor == 0 {
            return Err(SamplerError::InvalidConfig("queue_factor must be positive"));
        }

        Ok(())
    }
}

fn check_num_items(num_items: usize) -> Result<(), SamplerError> {
    if num_items == 0 {
        return Err(SamplerError::InvalidConfig("num_items must be positive"));
    }

    Ok(())
}

/// A minibatch of training examples, stored column-wise.
///
/// Row `r` of `seqs`, `positives` and `negatives` belongs to
/// `user_ids[r]`. Rows are left-padded with zeros.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// User of every row.
    pub user_ids: Vec<UserId>,
    /// Input items.
    pub seqs: Array2<ItemId>,
    /// The item following each input item.
    pub positives: Array2<ItemId>,
    /// A sampled item the user never interacted with in training.
    pub negatives: Array2<ItemId>,
}

impl Batch {
    fn zeros(batch_size: usize, max_sequence_length: usize) -> Self {
        Batch {
            user_ids: Vec::with_capacity(batch_size),
            seqs: Array2::zeros((batch_size, max_sequence_length)),
            positives: Array2::zeros((batch_size, max_sequence_length)),
            negatives: Array2::zeros((batch_size, max_sequence_length)),
        }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the batch holds no examples.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Length of every sequence.
    pub fn max_sequence_length(&self) -> usize {
        self.seqs.ncols()
    }
}

/// Training sequences shared read-only between workers.
#[derive(Debug)]
struct TrainingData {
    sequences: Sequences,
    item_sets: HashMap<UserId, HashSet<ItemId>>,
    valid_users: Vec<UserId>,
}

impl TrainingData {
    fn new(train: &Sequences, negatives: &NegativeSampler) -> Result<Self, SamplerError> {
        let valid_users: Vec<UserId> = train
            .iter()
            .filter(|(_, items)| items.len() > 1)
            .map(|(&user_id, _)| user_id)
            .collect();

        if valid_users.is_empty() {
            return Err(SamplerError::NoValidUsers);
        }

        let mut item_sets = HashMap::with_capacity(valid_users.len());

        for &user_id in &valid_users {
            let items: HashSet<ItemId> = train[&user_id].iter().cloned().collect();

            if !negatives.can_sample(&items) {
                return Err(SamplerError::ExhaustedItemRange { user_id });
            }

            item_sets.insert(user_id, items);
        }

        Ok(TrainingData {
            sequences: train.clone(),
            item_sets,
            valid_users,
        })
    }
}

/// Builds minibatches for one worker.
///
/// Users are visited in a shuffled cycle: every user with at least two
/// training items appears once per cycle, and the order is reshuffled
/// whenever a cycle completes.
#[derive(Debug)]
pub struct BatchProducer {
    data: Arc<TrainingData>,
    negatives: NegativeSampler,
    batch_size: usize,
    max_sequence_length: usize,
    permutation: Vec<UserId>,
    cursor: usize,
    rng: XorShiftRng,
}

impl BatchProducer {
    /// Create a producer with its own generator seeded from `seed`.
    pub fn new(
        train: &Sequences,
        num_items: usize,
        batch_size: usize,
        max_sequence_length: usize,
        seed: u64,
    ) -> Result<Self, SamplerError> {
        SamplerConfig::new(batch_size, max_sequence_length).validate()?;
        check_num_items(num_items)?;

        let negatives = NegativeSampler::for_items(num_items);
        let data = Arc::new(TrainingData::new(train, &negatives)?);

        Ok(Self::with_data(
            data,
            negatives,
            batch_size,
            max_sequence_length,
            seed,
        ))
    }

    fn with_data(
        data: Arc<TrainingData>,
        negatives: NegativeSampler,
        batch_size: usize,
        max_sequence_length: usize,
        seed: u64,
    ) -> Self {
        let permutation = data.valid_users.clone();
        let cursor = permutation.len();

        BatchProducer {
            data,
            negatives,
            batch_size,
            max_sequence_length,
            permutation,
            cursor,
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }

    fn next_user(&mut self) -> UserId {
        if self.cursor >= self.permutation.len() {
            self.permutation.shuffle(&mut self.rng);
            self.cursor = 0;
        }

        let user_id = self.permutation[self.cursor];
        self.cursor += 1;

        match self.data.sequences.get(&user_id) {
            Some(items) if items.len() > 1 => user_id,
            _ => {
                let idx = self.rng.gen_range(0..self.data.valid_users.len());
                self.data.valid_users[idx]
            }
        }
    }

    /// Fill one row, walking the history backwards from the tail.
    fn fill_row(
        &mut self,
        user_id: UserId,
        mut seq: ArrayViewMut1<ItemId>,
        mut pos: ArrayViewMut1<ItemId>,
        mut neg: ArrayViewMut1<ItemId>,
    ) {
        let (history, exclude) = match (
            self.data.sequences.get(&user_id),
            self.data.item_sets.get(&user_id),
        ) {
            (Some(history), Some(exclude)) => (history, exclude),
            _ => return,
        };

        let (&last, rest) = match history.split_last() {
            Some(split) => split,
            None => return,
        };

        let mut next = last;

        for (idx, &item) in izip!((0..self.max_sequence_length).rev(), rest.iter().rev()) {
            seq[idx] = item;
            pos[idx] = next;
            neg[idx] = self.negatives.draw(&mut self.rng, exclude);
            next = item;
        }
    }

    /// Build a batch, giving up early if `stop` is raised.
    fn produce_until(&mut self, stop: &AtomicBool) -> Option<Batch> {
        let mut batch = Batch::zeros(self.batch_size, self.max_sequence_length);

        for row in 0..self.batch_size {
            if stop.load(Ordering::Acquire) {
                return None;
            }

            let user_id = self.next_user();
            self.fill_row(
                user_id,
                batch.seqs.row_mut(row),
                batch.positives.row_mut(row),
                batch.negatives.row_mut(row),
            );
            batch.user_ids.push(user_id);
        }

        Some(batch)
    }

    /// Build the next batch.
    pub fn next_batch(&mut self) -> Batch {
        let never = AtomicBool::new(false);
        match self.produce_until(&never) {
            Some(batch) => batch,
            None => unreachable!("stop flag is never raised"),
        }
    }

    fn run(
        mut self,
        worker: usize,
        sender: SyncSender<Batch>,
        stop: Arc<AtomicBool>,
        _live: LiveWorker,
    ) {
        debug!(worker, "sampling worker started");

        while let Some(batch) = self.produce_until(&stop) {
            // Fails once the receiver is dropped.
            if sender.send(batch).is_err() {
                break;
            }
        }

        debug!(worker, "sampling worker stopped");
    }
}

/// Counts a worker as alive until dropped.
struct LiveWorker(Arc<AtomicUsize>);

impl LiveWorker {
    fn register(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        LiveWorker(Arc::clone(counter))
    }
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A pool of background batch producers sharing one bounded queue.
///
/// Workers are stopped and joined by [`WarpSampler::close`], which also
/// runs when the sampler is dropped.
pub struct WarpSampler {
    receiver: Option<Receiver<Batch>>,
    workers: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    live: Arc<AtomicUsize>,
}

impl WarpSampler {
    /// Start `config.num_workers` producers over the training sequences.
    ///
    /// Fails before starting any thread if no user has at least two
    /// training items.
    pub fn new(
        train: &Sequences,
        num_users: usize,
        num_items: usize,
        config: &SamplerConfig,
    ) -> Result<Self, SamplerError> {
        config.validate()?;
        check_num_items(num_items)?;

        let negatives = NegativeSampler::for_items(num_items);
        let data = Arc::new(TrainingData::new(train, &negatives)?);

        let mut seed_rng = match config.seed {
            Some(seed) => XorShiftRng::seed_from_u64(seed),
            None => XorShiftRng::seed_from_u64(rand::thread_rng().gen()),
        };

        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity());

        let mut sampler = WarpSampler {
            receiver: Some(receiver),
            workers: Vec::with_capacity(config.num_workers),
            stop: Arc::new(AtomicBool::new(false)),
            live: Arc::new(AtomicUsize::new(0)),
        };

        for worker in 0..config.num_workers {
            let producer = BatchProducer::with_data(
                Arc::clone(&data),
                negatives.clone(),
                config.batch_size,
                config.max_sequence_length,
                seed_rng.gen(),
            );
            let sender = sender.clone();
            let stop = Arc::clone(&sampler.stop);
            let live = LiveWorker::register(&sampler.live);

            let handle = thread::Builder::new()
                .name(format!("warp-sampler-{}", worker))
                .spawn(move || producer.run(worker, sender, stop, live))
                .map_err(SamplerError::Spawn)?;

            sampler.workers.push(handle);
        }

        info!(
            num_users,
            num_items,
            valid_users = data.valid_users.len(),
            workers = config.num_workers,
            queue_capacity = config.queue_capacity(),
            "started warp sampler"
        );

        Ok(sampler)
    }

    /// Block until the next batch is available.
    pub fn next_batch(&self) -> Result<Batch, SamplerError> {
        let receiver = self.receiver.as_ref().ok_or(SamplerError::Closed)?;

        receiver.recv().map_err(|_| SamplerError::Disconnected)
    }

    /// Stop every worker and wait for it to exit.
    ///
    /// Safe to call repeatedly and while workers are blocked on a full
    /// queue: dropping the receiving end wakes them up.
    pub fn close(&mut self) {
        if self.receiver.is_none() && self.workers.is_empty() {
            return;
        }

        self.stop.store(true, Ordering::Release);
        self.receiver.take();

        let num_workers = self.workers.len();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("sampling worker panicked");
            }
        }

        info!(workers = num_workers, "closed warp sampler");
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Number of worker threads still running.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for WarpSampler {
    fn drop(&mut self) {
        self.close();
    }
}
