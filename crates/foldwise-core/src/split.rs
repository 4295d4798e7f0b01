//! Resampling partitions of subjects.
//!
//! Outer splits are expressed over subject ids and generated lazily, one
//! repeat at a time. Inner splits (handed to a hyper-parameter search) are
//! expressed over row positions of the training matrix.

use std::collections::{BTreeMap, HashMap};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::data::{GroupLabels, SubjectId};
use crate::error::EvalError;

/// One train/test partition of subjects. The two sides are disjoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<SubjectId>,
    pub test: Vec<SubjectId>,
}

/// One train/test partition of row positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// How the outer loop of an evaluation resamples subjects.
#[derive(Debug, Clone, Default)]
pub struct SplitConfig {
    pub n_splits: usize,
    pub n_repeats: usize,
    /// When set, leave-one-group-out replaces k-fold.
    pub groups: Option<GroupLabels>,
}

impl SplitConfig {
    pub fn k_fold(n_splits: usize, n_repeats: usize) -> Self {
        Self {
            n_splits,
            n_repeats,
            groups: None,
        }
    }

    pub fn leave_one_group_out(groups: GroupLabels, n_repeats: usize) -> Self {
        Self {
            n_splits: 0,
            n_repeats,
            groups: Some(groups),
        }
    }
}

/// Derive the shuffle seed of one repeat.
fn repeat_seed(seed: u64, repeat: usize) -> u64 {
    let mut hash = seed ^ 0xcbf2_9ce4_8422_2325;
    hash = hash.wrapping_mul(0x0100_0000_01b3);
    hash ^= (repeat as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    hash.rotate_left(31).wrapping_mul(0x0100_0000_01b3)
}

/// Fold boundaries: the first `n % k` folds take one extra element.
fn fold_bounds(n: usize, n_splits: usize) -> Vec<(usize, usize)> {
    let fold_size = n / n_splits;
    let remainder = n % n_splits;
    let mut bounds = Vec::with_capacity(n_splits);
    let mut start = 0;
    for i in 0..n_splits {
        let end = start + fold_size + usize::from(i < remainder);
        bounds.push((start, end));
        start = end;
    }
    bounds
}

fn shuffled_positions(n: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    order
}

/// Partition `0..n` into folds; each fold's positions come back sorted.
fn partition(n: usize, n_splits: usize, seed: u64) -> Vec<IndexSplit> {
    let order = shuffled_positions(n, seed);
    let mut fold_of = vec![0usize; n];
    for (fold, (start, end)) in fold_bounds(n, n_splits).into_iter().enumerate() {
        for &pos in &order[start..end] {
            fold_of[pos] = fold;
        }
    }

    (0..n_splits)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|&pos| fold_of[pos] == fold);
            IndexSplit { train, test }
        })
        .collect()
}

fn check_k_fold(n: usize, n_splits: usize, n_repeats: usize) -> Result<(), EvalError> {
    if n_splits < 2 {
        return Err(EvalError::config(format!(
            "n_splits must be at least 2, got {n_splits}"
        )));
    }
    if n_splits > n {
        return Err(EvalError::config(format!(
            "n_splits ({n_splits}) cannot exceed the number of subjects ({n})"
        )));
    }
    if n_repeats == 0 {
        return Err(EvalError::config("n_repeats must be at least 1"));
    }
    Ok(())
}

/// Repeated k-fold partitions of a subject list.
///
/// Cheap to clone and restartable: every call to [`RepeatedKFold::iter`]
/// replays the same sequence.
#[derive(Debug, Clone)]
pub struct RepeatedKFold {
    subjects: Vec<SubjectId>,
    n_splits: usize,
    n_repeats: usize,
    seed: u64,
}

impl RepeatedKFold {
    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    pub fn n_repeats(&self) -> usize {
        self.n_repeats
    }

    /// Splits of a single repeat.
    pub fn repeat(&self, repeat: usize) -> Vec<Split> {
        partition(
            self.subjects.len(),
            self.n_splits,
            repeat_seed(self.seed, repeat),
        )
        .into_iter()
        .map(|s| to_subject_split(&self.subjects, &s))
        .collect()
    }

    pub fn iter(&self) -> SplitIter<'_> {
        SplitIter {
            source: SplitSource::KFold(self),
            repeat: 0,
            pending: Vec::new().into_iter(),
        }
    }
}

/// Repeated leave-one-group-out partitions of a subject list.
#[derive(Debug, Clone)]
pub struct RepeatedLeaveOneGroupOut {
    subjects: Vec<SubjectId>,
    /// Group index of every subject, aligned with `subjects`.
    assignment: Vec<usize>,
    groups: Vec<String>,
    n_repeats: usize,
}

impl RepeatedLeaveOneGroupOut {
    pub fn n_splits(&self) -> usize {
        self.groups.len()
    }

    pub fn n_repeats(&self) -> usize {
        self.n_repeats
    }

    /// Distinct group labels, in fold order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn repeat(&self, _repeat: usize) -> Vec<Split> {
        leave_out_by_assignment(&self.assignment, self.groups.len())
            .into_iter()
            .map(|s| to_subject_split(&self.subjects, &s))
            .collect()
    }

    pub fn iter(&self) -> SplitIter<'_> {
        SplitIter {
            source: SplitSource::Groups(self),
            repeat: 0,
            pending: Vec::new().into_iter(),
        }
    }
}

fn to_subject_split(subjects: &[SubjectId], split: &IndexSplit) -> Split {
    Split {
        train: split.train.iter().map(|&i| subjects[i].clone()).collect(),
        test: split.test.iter().map(|&i| subjects[i].clone()).collect(),
    }
}

fn leave_out_by_assignment(assignment: &[usize], n_groups: usize) -> Vec<IndexSplit> {
    (0..n_groups)
        .map(|group| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..assignment.len()).partition(|&pos| assignment[pos] == group);
            IndexSplit { train, test }
        })
        .collect()
}

/// Sorted distinct labels and the group index of every position.
fn assign_groups(labels: &[&str]) -> (Vec<String>, Vec<usize>) {
    let distinct: BTreeMap<&str, usize> = labels.iter().map(|l| (*l, 0)).collect();
    let groups: Vec<String> = distinct.keys().map(|l| l.to_string()).collect();
    let lookup: HashMap<&str, usize> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();
    let assignment = labels.iter().map(|l| lookup[l]).collect();
    (groups, assignment)
}

fn labels_for<'a>(
    subjects: &[SubjectId],
    group_labels: &'a GroupLabels,
) -> Result<Vec<&'a str>, EvalError> {
    subjects
        .iter()
        .map(|s| {
            group_labels
                .get(s)
                .map(String::as_str)
                .ok_or_else(|| EvalError::config(format!("subject '{s}' has no group label")))
        })
        .collect()
}

/// A restartable resampling scheme, k-fold or leave-one-group-out.
#[derive(Debug, Clone)]
pub enum Resampling {
    KFold(RepeatedKFold),
    LeaveOneGroupOut(RepeatedLeaveOneGroupOut),
}

impl Resampling {
    /// Folds per repeat. Constant across repeats.
    pub fn n_splits(&self) -> usize {
        match self {
            Resampling::KFold(k) => k.n_splits(),
            Resampling::LeaveOneGroupOut(g) => g.n_splits(),
        }
    }

    pub fn n_repeats(&self) -> usize {
        match self {
            Resampling::KFold(k) => k.n_repeats(),
            Resampling::LeaveOneGroupOut(g) => g.n_repeats(),
        }
    }

    pub fn n_folds(&self) -> usize {
        self.n_splits() * self.n_repeats()
    }

    pub fn iter(&self) -> SplitIter<'_> {
        match self {
            Resampling::KFold(k) => k.iter(),
            Resampling::LeaveOneGroupOut(g) => g.iter(),
        }
    }
}

impl<'a> IntoIterator for &'a Resampling {
    type Item = Split;
    type IntoIter = SplitIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy)]
enum SplitSource<'a> {
    KFold(&'a RepeatedKFold),
    Groups(&'a RepeatedLeaveOneGroupOut),
}

/// Lazily yields splits, materializing one repeat at a time.
#[derive(Debug, Clone)]
pub struct SplitIter<'a> {
    source: SplitSource<'a>,
    repeat: usize,
    pending: std::vec::IntoIter<Split>,
}

impl Iterator for SplitIter<'_> {
    type Item = Split;

    fn next(&mut self) -> Option<Split> {
        loop {
            if let Some(split) = self.pending.next() {
                return Some(split);
            }
            let n_repeats = match self.source {
                SplitSource::KFold(k) => k.n_repeats,
                SplitSource::Groups(g) => g.n_repeats,
            };
            if self.repeat >= n_repeats {
                return None;
            }
            let next = match self.source {
                SplitSource::KFold(k) => k.repeat(self.repeat),
                SplitSource::Groups(g) => g.repeat(self.repeat),
            };
            self.repeat += 1;
            self.pending = next.into_iter();
        }
    }
}

/// Repeated k-fold over `subjects`. Repeat `i` is reproducible from
/// `(seed, i)` alone.
pub fn repeated_k_fold(
    subjects: &[SubjectId],
    n_repeats: usize,
    n_splits: usize,
    seed: u64,
) -> Result<Resampling, EvalError> {
    check_k_fold(subjects.len(), n_splits, n_repeats)?;
    Ok(Resampling::KFold(RepeatedKFold {
        subjects: subjects.to_vec(),
        n_splits,
        n_repeats,
        seed,
    }))
}

/// Repeated leave-one-group-out over `subjects`; one fold per distinct
/// label present among them.
pub fn repeated_leave_one_group_out(
    subjects: &[SubjectId],
    n_repeats: usize,
    group_labels: &GroupLabels,
) -> Result<Resampling, EvalError> {
    if n_repeats == 0 {
        return Err(EvalError::config("n_repeats must be at least 1"));
    }
    let labels = labels_for(subjects, group_labels)?;
    let (groups, assignment) = assign_groups(&labels);
    if groups.len() < 2 {
        return Err(EvalError::config(format!(
            "leave-one-group-out needs at least 2 distinct groups, found {}",
            groups.len()
        )));
    }
    Ok(Resampling::LeaveOneGroupOut(RepeatedLeaveOneGroupOut {
        subjects: subjects.to_vec(),
        assignment,
        groups,
        n_repeats,
    }))
}

/// Number of distinct group labels among `subjects`.
pub fn num_groups(subjects: &[SubjectId], group_labels: &GroupLabels) -> Result<usize, EvalError> {
    let labels = labels_for(subjects, group_labels)?;
    Ok(assign_groups(&labels).0.len())
}

/// Single k-fold over row positions `0..n`.
pub fn k_fold_indices(n: usize, n_splits: usize, seed: u64) -> Result<Vec<IndexSplit>, EvalError> {
    check_k_fold(n, n_splits, 1)?;
    Ok(partition(n, n_splits, repeat_seed(seed, 0)))
}

/// Leave-one-group-out over row positions, one label per row.
pub fn leave_one_group_out_indices(labels: &[&str]) -> Result<Vec<IndexSplit>, EvalError> {
    let (groups, assignment) = assign_groups(labels);
    if groups.len() < 2 {
        return Err(EvalError::config(format!(
            "leave-one-group-out needs at least 2 distinct groups, found {}",
            groups.len()
        )));
    }
    Ok(leave_out_by_assignment(&assignment, groups.len()))
}
