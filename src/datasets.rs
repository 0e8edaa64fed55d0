//! Named datasets stored as `<data dir>/<name>.txt`.
use std::env;
use std::path::PathBuf;

use failure::Fail;
use tracing::info;

use super::data::{Partition, Sequences};

/// Environment variable overriding the data directory.
pub const DATA_DIR_VAR: &str = "SASREC_DATA_DIR";

/// Dataset error types.
#[derive(Debug, Fail)]
pub enum DatasetError {
    /// No file exists for the requested dataset.
    #[fail(display = "Dataset file {:?} does not exist.", _0)]
    MissingDataset(PathBuf),
}

/// The data directory: `$SASREC_DATA_DIR`, or `data` in the working
/// directory.
pub fn data_dir() -> PathBuf {
    env::var_os(DATA_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Path of the named dataset.
pub fn dataset_path(name: &str) -> PathBuf {
    data_dir().join(format!("{}.txt", name))
}

/// Load and partition the named dataset.
pub fn load_dataset(name: &str) -> Result<Partition, failure::Error> {
    let path = dataset_path(name);

    if !path.exists() {
        return Err(DatasetError::MissingDataset(path).into());
    }

    let partition = Partition::from_path(&path)?;
    let stats = DatasetStats::from(&partition);

    info!(
        dataset = name,
        users = stats.num_users,
        items = stats.num_items,
        interactions = stats.num_interactions,
        average_sequence_length = stats.average_sequence_length,
        "loaded dataset"
    );

    Ok(partition)
}

/// Summary statistics of a partitioned dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatasetStats {
    /// Largest user id.
    pub num_users: usize,
    /// Largest item id.
    pub num_items: usize,
    /// Interactions across all splits.
    pub num_interactions: usize,
    /// Mean length of the training sequences.
    pub average_sequence_length: f64,
}

impl<'a> From<&'a Partition> for DatasetStats {
    fn from(partition: &'a Partition) -> Self {
        let count = |sequences: &Sequences| -> usize {
            sequences.values().map(|items| items.len()).sum()
        };

        let num_train = count(&partition.train);
        let num_sequences = partition.train.len();

        DatasetStats {
            num_users: partition.num_users,
            num_items: partition.num_items,
            num_interactions: num_train + count(&partition.valid) + count(&partition.test),
            average_sequence_length: if num_sequences == 0 {
                0.0
            } else {
                num_train as f64 / num_sequences as f64
            },
        }
    }
}
