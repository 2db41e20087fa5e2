use std::collections::{BTreeMap, BTreeSet};

use kvtree::{KvTree, SortMode};
use redundancy::xor_file_name;
use summary::{KEY_COMPLETE, KEY_FILE, KEY_FILES, KEY_RANK};

use crate::scanner::{Scan, ScannedDataset, SetMember};

/// What to do about one XOR set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SetDecision {
    /// All members present; nothing to do.
    Intact,
    /// Exactly one member is gone; rebuild it.
    Rebuild {
        /// One-based slot of the missing member.
        missing_member: usize,
        /// Where the rebuilt fragment belongs, relative to the dataset dir.
        missing_path: String,
        /// Surviving fragments, ordered from the member after the missing
        /// one.
        survivor_paths: Vec<String>,
    },
    /// Two or more members are gone; the set cannot be recovered.
    Unrecoverable,
}

/// Inspection result for one XOR set.
#[derive(Clone, Debug)]
pub struct XorSetPlan {
    /// Set id shared by the fragments.
    pub set_id: i64,
    /// Declared member count.
    pub set_size: usize,
    /// The decision for this set.
    pub decision: SetDecision,
}

/// Inspection result for one dataset.
#[derive(Clone, Debug)]
pub struct DatasetPlan {
    /// Dataset id.
    pub id: i64,
    /// Job size the dataset was written with.
    pub ranks: i64,
    /// Ranks whose files are absent or failed their checks.
    pub missing: BTreeSet<i64>,
    /// True when structural assumptions broke; such a dataset is beyond
    /// repair regardless of redundancy.
    pub invalid: bool,
    /// Per-set decisions.
    pub sets: Vec<XorSetPlan>,
}

impl DatasetPlan {
    /// True when every rank checked out and nothing structural broke.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.invalid && self.missing.is_empty()
    }

    /// True when any set was declared unrecoverable.
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        self.sets
            .iter()
            .any(|s| s.decision == SetDecision::Unrecoverable)
    }

    /// The rebuild commands this plan calls for.
    #[must_use]
    pub fn rebuilds(&self) -> Vec<&XorSetPlan> {
        self.sets
            .iter()
            .filter(|s| matches!(s.decision, SetDecision::Rebuild { .. }))
            .collect()
    }
}

/// Collates the scan into per-dataset plans: known and missing ranks, set
/// decisions, and validity.
#[must_use]
pub fn inspect(scan: &Scan) -> Vec<DatasetPlan> {
    scan.datasets
        .iter()
        .map(|(&id, entry)| inspect_dataset(id, entry))
        .collect()
}

fn inspect_dataset(id: i64, entry: &ScannedDataset) -> DatasetPlan {
    let mut missing: BTreeSet<i64> = BTreeSet::new();
    let mut invalid = entry.ranks_conflict;

    let ranks = entry.ranks.unwrap_or(0);
    if entry.ranks.is_none() {
        tracing::error!(dataset = id, "no file recorded a job size");
        invalid = true;
    }

    // walk ranks in ascending order, accounting for gaps
    let mut rank_tree = KvTree::new();
    if let Some(source) = entry.rank2file.get(KEY_RANK) {
        rank_tree.merge(source);
    }
    rank_tree.sort(SortMode::AscendingInt);

    let mut expected_rank: i64 = 0;
    for (rank_key, rank_entry) in rank_tree.iter() {
        let Ok(rank) = rank_key.parse::<i64>() else {
            invalid = true;
            continue;
        };
        if rank >= ranks {
            tracing::error!(dataset = id, rank, ranks, "rank out of range");
            invalid = true;
        }
        while expected_rank < rank {
            missing.insert(expected_rank);
            expected_rank += 1;
        }

        let Some(files) = rank_entry.get_int(KEY_FILES) else {
            tracing::error!(dataset = id, rank, "rank has no expected file count");
            invalid = true;
            expected_rank += 1;
            continue;
        };

        let mut file_count: i64 = 0;
        if let Some(file_tree) = rank_entry.get(KEY_FILE) {
            for (_, file_entry) in file_tree.iter() {
                if file_entry.get_int(KEY_COMPLETE) == Some(0) {
                    missing.insert(rank);
                }
                file_count += 1;
            }
        }
        if file_count < files {
            missing.insert(rank);
        }
        if file_count > files {
            tracing::error!(dataset = id, rank, "rank has more files than promised");
            invalid = true;
        }

        expected_rank += 1;
    }
    while expected_rank < ranks {
        missing.insert(expected_rank);
        expected_rank += 1;
    }
    if expected_rank > ranks {
        invalid = true;
    }

    let sets = entry
        .xor_sets
        .iter()
        .map(|(&set_id, (set_size, members))| {
            decide_set(set_id, *set_size, members, &missing)
        })
        .collect();

    DatasetPlan {
        id,
        ranks,
        missing,
        invalid,
        sets,
    }
}

fn decide_set(
    set_id: i64,
    set_size: usize,
    survivors: &BTreeMap<usize, SetMember>,
    missing_ranks: &BTreeSet<i64>,
) -> XorSetPlan {
    // a member is lost when its fragment is gone, or when its fragment is
    // here but its rank's data files are not
    let mut lost: Vec<usize> = Vec::new();
    for member in 1..=set_size {
        match survivors.get(&member) {
            None => lost.push(member),
            Some(info) if missing_ranks.contains(&info.rank) => lost.push(member),
            Some(_) => {}
        }
    }

    let decision = if lost.len() > 1 || survivors.len() < set_size - 1 {
        SetDecision::Unrecoverable
    } else if let Some(&missing_member) = lost.first() {
        let missing_path = format!(
            ".scr/{}",
            xor_file_name(missing_member - 1, set_size, set_id)
        );
        let survivor_paths = (1..set_size)
            .map(|j| {
                let slot = (missing_member - 1 + j) % set_size + 1;
                survivors
                    .get(&slot)
                    .map(|m| m.file.clone())
                    .unwrap_or_default()
            })
            .collect();
        SetDecision::Rebuild {
            missing_member,
            missing_path,
            survivor_paths,
        }
    } else {
        SetDecision::Intact
    };

    XorSetPlan {
        set_id,
        set_size,
        decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ScannedDataset;
    use summary::{KEY_RANKS, KEY_SIZE};

    fn entry_with_ranks(ranks: i64) -> ScannedDataset {
        let mut e = ScannedDataset::default();
        e.ranks = Some(ranks);
        e.rank2file.set_int(KEY_RANKS, ranks);
        e
    }

    fn add_rank(e: &mut ScannedDataset, rank: i64, files: &[&str]) {
        let node = e.rank2file.entry(KEY_RANK).entry(rank.to_string());
        node.set_int(KEY_FILES, files.len() as i64);
        for f in files {
            node.entry(KEY_FILE).entry(*f).set_bytecount(KEY_SIZE, 1);
        }
    }

    #[test]
    fn complete_dataset_has_empty_plan() {
        let mut e = entry_with_ranks(2);
        add_rank(&mut e, 0, &["a"]);
        add_rank(&mut e, 1, &["b"]);

        let plan = inspect_dataset(7, &e);
        assert!(plan.is_complete());
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn gaps_become_missing_ranks() {
        let mut e = entry_with_ranks(4);
        add_rank(&mut e, 0, &["a"]);
        add_rank(&mut e, 2, &["c"]);

        let plan = inspect_dataset(7, &e);
        assert!(!plan.is_complete());
        assert_eq!(plan.missing, BTreeSet::from([1, 3]));
        assert!(!plan.invalid);
    }

    #[test]
    fn short_file_count_marks_rank_missing() {
        let mut e = entry_with_ranks(1);
        let node = e.rank2file.entry(KEY_RANK).entry("0");
        node.set_int(KEY_FILES, 2);
        node.entry(KEY_FILE).entry("only-one");

        let plan = inspect_dataset(7, &e);
        assert_eq!(plan.missing, BTreeSet::from([0]));
    }

    #[test]
    fn excess_files_invalidate() {
        let mut e = entry_with_ranks(1);
        let node = e.rank2file.entry(KEY_RANK).entry("0");
        node.set_int(KEY_FILES, 1);
        node.entry(KEY_FILE).entry("a");
        node.entry(KEY_FILE).entry("b");

        let plan = inspect_dataset(7, &e);
        assert!(plan.invalid);
    }

    #[test]
    fn rank_out_of_range_invalidates() {
        let mut e = entry_with_ranks(2);
        add_rank(&mut e, 0, &["a"]);
        add_rank(&mut e, 5, &["b"]);

        let plan = inspect_dataset(7, &e);
        assert!(plan.invalid);
    }

    #[test]
    fn conflicting_job_sizes_invalidate() {
        let mut e = entry_with_ranks(2);
        e.ranks_conflict = true;
        add_rank(&mut e, 0, &["a"]);
        add_rank(&mut e, 1, &["b"]);

        let plan = inspect_dataset(7, &e);
        assert!(plan.invalid);
    }

    fn survivors(pairs: &[(usize, i64)]) -> BTreeMap<usize, SetMember> {
        pairs
            .iter()
            .map(|&(slot, rank)| {
                (
                    slot,
                    SetMember {
                        file: format!(".scr/{}", xor_file_name(slot - 1, 4, 0)),
                        rank,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn one_absent_fragment_triggers_rebuild() {
        let s = survivors(&[(1, 0), (2, 1), (4, 3)]);
        let plan = decide_set(0, 4, &s, &BTreeSet::new());
        let SetDecision::Rebuild {
            missing_member,
            missing_path,
            survivor_paths,
        } = plan.decision
        else {
            panic!("expected a rebuild");
        };
        assert_eq!(missing_member, 3);
        assert_eq!(missing_path, ".scr/3_of_4_in_0.xor");
        // ordered from the member after the missing one: 4, 1, 2
        assert_eq!(
            survivor_paths,
            vec![
                ".scr/4_of_4_in_0.xor".to_owned(),
                ".scr/1_of_4_in_0.xor".to_owned(),
                ".scr/2_of_4_in_0.xor".to_owned(),
            ]
        );
    }

    #[test]
    fn fragment_present_but_rank_data_missing_also_rebuilds() {
        let s = survivors(&[(1, 0), (2, 1), (3, 2), (4, 3)]);
        let plan = decide_set(0, 4, &s, &BTreeSet::from([2]));
        assert!(matches!(
            plan.decision,
            SetDecision::Rebuild {
                missing_member: 3,
                ..
            }
        ));
    }

    #[test]
    fn two_lost_members_are_unrecoverable() {
        // ranks 1 and 2 of the same set are gone
        let s = survivors(&[(1, 0), (4, 3)]);
        let plan = decide_set(0, 4, &s, &BTreeSet::new());
        assert_eq!(plan.decision, SetDecision::Unrecoverable);
    }

    #[test]
    fn full_set_is_intact() {
        let s = survivors(&[(1, 0), (2, 1), (3, 2), (4, 3)]);
        let plan = decide_set(0, 4, &s, &BTreeSet::new());
        assert_eq!(plan.decision, SetDecision::Intact);
    }
}
