//! Interaction loading, adjacency indices and leave-last-two splits.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use failure::Fail;

use super::{ItemId, UserId};

/// Per-user item sequences, keyed by user id.
pub type Sequences = BTreeMap<UserId, Vec<ItemId>>;

/// Histories shorter than this keep every interaction in the training split.
const MIN_EVALUATION_HISTORY: usize = 4;

/// Data loading error types.
#[derive(Debug, Fail)]
pub enum DataError {
    /// The interaction file could not be read.
    #[fail(display = "Failed to read interactions: {}", _0)]
    Io(#[cause] io::Error),
    /// A line did not parse as two positive integers.
    #[fail(display = "Malformed interaction on line {}: {}", line, reason)]
    MalformedInput {
        /// One-based line number.
        line: u64,
        /// What went wrong.
        reason: String,
    },
    /// The input contained no interactions.
    #[fail(display = "The dataset contains no interactions.")]
    EmptyDataset,
}

impl From<io::Error> for DataError {
    fn from(err: io::Error) -> Self {
        DataError::Io(err)
    }
}

/// A single (user, item) interaction.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
}

impl Interaction {
    /// Create a new interaction.
    pub fn new(user_id: UserId, item_id: ItemId) -> Self {
        Interaction { user_id, item_id }
    }

    /// The user id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The item id.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }
}

/// Interactions in file order.
#[derive(Clone, Debug, Default)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Read a `user item` file, one interaction per line.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Read interactions from any buffered reader.
    ///
    /// The two ids may be separated by any run of whitespace; blank lines
    /// are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, DataError> {
        let mut interactions = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = idx as u64 + 1;

            if line.trim().is_empty() {
                continue;
            }

            let interaction = parse_line(&line).map_err(|reason| DataError::MalformedInput {
                line: line_number,
                reason,
            })?;

            interactions.push(interaction);
        }

        Ok(Interactions::from(interactions))
    }

    /// The interactions, in file order.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Largest user id.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Largest item id.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// Group item ids by user, preserving file order within each user.
    pub fn to_sequences(&self) -> Sequences {
        let mut sequences = Sequences::new();

        for interaction in &self.interactions {
            sequences
                .entry(interaction.user_id())
                .or_insert_with(Vec::new)
                .push(interaction.item_id());
        }

        sequences
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id()).max().unwrap_or(0);
        let num_items = data.iter().map(|x| x.item_id()).max().unwrap_or(0);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

fn parse_id(field: Option<&str>) -> Result<usize, String> {
    let field = field.ok_or_else(|| "expected two ids".to_owned())?;
    let id: usize = field
        .parse()
        .map_err(|err| format!("invalid id {:?}: {}", field, err))?;

    if id == 0 {
        return Err("ids must be positive".to_owned());
    }

    Ok(id)
}

fn parse_line(line: &str) -> Result<Interaction, String> {
    let mut fields = line.split_whitespace();

    let user_id = parse_id(fields.next())?;
    let item_id = parse_id(fields.next())?;

    if fields.next().is_some() {
        return Err("expected exactly two ids".to_owned());
    }

    Ok(Interaction::new(user_id, item_id))
}

/// User-to-item and item-to-user adjacency lists, indexed by id.
///
/// Index 0 of both lists is unused.
#[derive(Clone, Debug)]
pub struct SequenceIndex {
    /// Items of every user, in interaction order.
    pub user_items: Vec<Vec<ItemId>>,
    /// Users of every item, in interaction order.
    pub item_users: Vec<Vec<UserId>>,
}

/// Build adjacency lists for all users and items.
pub fn build_index(interactions: &Interactions) -> Result<SequenceIndex, DataError> {
    if interactions.is_empty() {
        return Err(DataError::EmptyDataset);
    }

    let mut user_items = vec![Vec::new(); interactions.num_users() + 1];
    let mut item_users = vec![Vec::new(); interactions.num_items() + 1];

    for interaction in interactions.data() {
        user_items[interaction.user_id()].push(interaction.item_id());
        item_users[interaction.item_id()].push(interaction.user_id());
    }

    Ok(SequenceIndex {
        user_items,
        item_users,
    })
}

/// Train, validation and test splits of every user's history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Partition {
    /// All but the last two interactions (or the whole history when short).
    pub train: Sequences,
    /// The second-to-last interaction, or nothing for short histories.
    pub valid: Sequences,
    /// The last interaction, or nothing for short histories.
    pub test: Sequences,
    /// Largest user id.
    pub num_users: usize,
    /// Largest item id.
    pub num_items: usize,
}

impl Partition {
    /// Load and partition a whitespace-separated interaction file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        data_partition(&Interactions::from_path(path)?)
    }

    /// Users that can be evaluated (history of at least four interactions).
    pub fn num_testable_users(&self) -> usize {
        self.test.values().filter(|items| !items.is_empty()).count()
    }
}

/// Split every user's history with the leave-last-two policy.
///
/// Users with at least four interactions hold out their second-to-last
/// item for validation and their last item for testing; everyone else keeps
/// the full history for training and gets empty validation/test entries.
pub fn data_partition(interactions: &Interactions) -> Result<Partition, DataError> {
    if interactions.is_empty() {
        return Err(DataError::EmptyDataset);
    }

    let mut train = Sequences::new();
    let mut valid = Sequences::new();
    let mut test = Sequences::new();

    for (user_id, mut history) in interactions.to_sequences() {
        if history.len() < MIN_EVALUATION_HISTORY {
            train.insert(user_id, history);
            valid.insert(user_id, Vec::new());
            test.insert(user_id, Vec::new());
        } else {
            let test_items = history.split_off(history.len() - 1);
            let valid_items = history.split_off(history.len() - 1);

            train.insert(user_id, history);
            valid.insert(user_id, valid_items);
            test.insert(user_id, test_items);
        }
    }

    Ok(Partition {
        train,
        valid,
        test,
        num_users: interactions.num_users(),
        num_items: interactions.num_items(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    fn parse(text: &str) -> Result<Interactions, DataError> {
        Interactions::from_reader(text.as_bytes())
    }

    fn write_temp(name: &str, text: &str) -> std::path::PathBuf {
        let file_name = format!("sasrec-data-{}-{}.txt", std::process::id(), name);
        let path = std::env::temp_dir().join(file_name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn builds_adjacency_lists() {
        let interactions = parse("1 3\n2 3\n1 1\n3 2\n").unwrap();
        let index = build_index(&interactions).unwrap();

        assert_eq!(index.user_items.len(), 4);
        assert_eq!(index.item_users.len(), 4);
        assert_eq!(index.user_items[0], Vec::<ItemId>::new());
        assert_eq!(index.user_items[1], vec![3, 1]);
        assert_eq!(index.item_users[3], vec![1, 2]);
        assert_eq!(index.item_users[2], vec![3]);
    }

    #[test]
    fn malformed_lines_are_rejected() {
        match parse("1 2\n1 x\n") {
            Err(DataError::MalformedInput { line, .. }) => assert_eq!(line, 2),
            other => panic!("Unexpected result: {:?}", other),
        }

        assert!(parse("1 2\n1 2 3\n").is_err());
        assert!(parse("0 2\n").is_err());
    }

    #[test]
    fn any_whitespace_separates_ids() {
        let tabs = write_temp("tabs", "1\t2\n1\t5\n");
        let spaces = write_temp("spaces", "1  2\n  1 3   \n\n2 \t 4\n");

        let interactions = Interactions::from_path(&tabs).unwrap();
        assert_eq!(interactions.len(), 2);
        assert_eq!(interactions.num_items(), 5);

        let interactions = Interactions::from_path(&spaces).unwrap();
        let items: Vec<ItemId> = interactions.data().iter().map(|x| x.item_id()).collect();
        assert_eq!(items, vec![2, 3, 4]);
        assert_eq!(interactions.num_users(), 2);

        std::fs::remove_file(tabs).unwrap();
        std::fs::remove_file(spaces).unwrap();
    }

    #[test]
    fn malformed_line_numbers_count_blank_lines() {
        match parse("1 2\n\n\n3 0\n") {
            Err(DataError::MalformedInput { line, reason }) => {
                assert_eq!(line, 4);
                assert!(reason.contains("positive"));
            }
            other => panic!("Unexpected result: {:?}", other),
        }
        match parse("1 2\n\n7\n") {
            Err(DataError::MalformedInput { line, .. }) => assert_eq!(line, 3),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        let interactions = parse("").unwrap();

        match data_partition(&interactions) {
            Err(DataError::EmptyDataset) => {}
            other => panic!("Unexpected result: {:?}", other),
        }
        assert!(build_index(&interactions).is_err());
    }

    #[test]
    fn leave_last_two_split() {
        let text: String = (1..=3)
            .flat_map(|user| [10, 20, 30, 40].iter().map(move |item| format!("{} {}\n", user, item)))
            .collect();
        let partition = data_partition(&parse(&text).unwrap()).unwrap();

        for user in 1..=3 {
            assert_eq!(partition.train[&user], vec![10, 20]);
            assert_eq!(partition.valid[&user], vec![30]);
            assert_eq!(partition.test[&user], vec![40]);
        }
        assert_eq!(partition.num_users, 3);
        assert_eq!(partition.num_items, 40);
        assert_eq!(partition.num_testable_users(), 3);
    }

    #[test]
    fn absent_users_have_no_entries() {
        let partition = data_partition(&parse("2 1\n5 1\n5 2\n").unwrap()).unwrap();

        assert_eq!(partition.num_users, 5);
        assert!(!partition.train.contains_key(&1));
        assert!(!partition.valid.contains_key(&3));
        assert!(!partition.test.contains_key(&4));
        assert_eq!(partition.train[&5], vec![1, 2]);
        assert!(partition.valid[&5].is_empty());
    }

    #[test]
    fn partition_reconstructs_histories() {
        let mut rng = XorShiftRng::seed_from_u64(42);

        let data: Vec<Interaction> = (0..2000)
            .map(|_| Interaction::new(rng.gen_range(1..50), rng.gen_range(1..200)))
            .collect();
        let interactions = Interactions::from(data);
        let sequences = interactions.to_sequences();
        let partition = data_partition(&interactions).unwrap();

        assert_eq!(partition.train.len(), sequences.len());

        for (user_id, history) in &sequences {
            let valid = &partition.valid[user_id];
            let test = &partition.test[user_id];

            let rebuilt: Vec<ItemId> = partition.train[user_id]
                .iter()
                .chain(valid.iter())
                .chain(test.iter())
                .cloned()
                .collect();
            assert_eq!(&rebuilt, history);

            let held_out = valid.len() + test.len();
            if history.len() < 4 {
                assert_eq!(held_out, 0);
            } else {
                assert_eq!(held_out, 2);
            }
        }
    }
}
