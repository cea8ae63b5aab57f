//! Batch planning.
//!
//! The ordered test list is cut into contiguous, balanced batches. Sizes
//! differ by at most one, larger batches first, and empty batches are
//! never produced.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::TestId;

/// The tests one attempt should run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TestSelection {
    /// Every test the tool knows about.
    All,
    /// Only these tests.
    Only(Vec<TestId>),
}

impl TestSelection {
    pub fn is_all(&self) -> bool {
        matches!(self, TestSelection::All)
    }

    /// The selected identifiers; empty for [`TestSelection::All`].
    pub fn tests(&self) -> &[TestId] {
        match self {
            TestSelection::All => &[],
            TestSelection::Only(ids) => ids,
        }
    }
}

impl fmt::Display for TestSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestSelection::All => f.write_str("all tests"),
            TestSelection::Only(ids) if ids.len() == 1 => f.write_str("1 test"),
            TestSelection::Only(ids) => write!(f, "{} tests", ids.len()),
        }
    }
}

/// A unit of work: the tests one retry chain is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based batch number.
    pub index: usize,
    pub selection: TestSelection,
}

impl Batch {
    /// A batch running the tool's whole suite.
    pub fn everything(index: usize) -> Self {
        Self {
            index,
            selection: TestSelection::All,
        }
    }
}

/// Splits `tests` into at most `batch_count` batches.
///
/// Duplicates are dropped, keeping the first occurrence, so every test
/// lands in exactly one batch. Planning is deterministic.
pub fn plan_batches(tests: &[TestId], batch_count: usize) -> Vec<Batch> {
    let mut seen = HashSet::new();
    let tests: Vec<&TestId> = tests.iter().filter(|t| seen.insert(*t)).collect();

    let batch_count = batch_count.max(1).min(tests.len());
    if batch_count == 0 {
        return Vec::new();
    }

    let base = tests.len() / batch_count;
    let extra = tests.len() % batch_count;

    let mut batches = Vec::with_capacity(batch_count);
    let mut start = 0;
    for i in 0..batch_count {
        let size = base + usize::from(i < extra);
        let selection = tests[start..start + size]
            .iter()
            .map(|t| (*t).clone())
            .collect();
        batches.push(Batch {
            index: i + 1,
            selection: TestSelection::Only(selection),
        });
        start += size;
    }

    batches
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn ids(n: usize) -> Vec<TestId> {
        (0..n).map(|i| format!("Suite/Case/test{:03}", i)).collect()
    }

    #[test]
    fn test_balanced_contiguous_split() {
        let batches = plan_batches(&ids(7), 3);

        let sizes: Vec<usize> = batches.iter().map(|b| b.selection.tests().len()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(batches[1].selection.tests()[0], "Suite/Case/test003");
    }

    #[test]
    fn test_more_batches_than_tests() {
        let batches = plan_batches(&ids(2), 5);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.selection.tests().len() == 1));
    }

    #[test]
    fn test_no_tests_no_batches() {
        assert!(plan_batches(&[], 4).is_empty());
    }

    #[test]
    fn test_duplicates_land_once() {
        let tests = vec!["A/B/t1".to_string(), "A/B/t2".to_string(), "A/B/t1".to_string()];
        let batches = plan_batches(&tests, 2);
        let all: Vec<&TestId> = batches.iter().flat_map(|b| b.selection.tests()).collect();
        assert_eq!(all, vec!["A/B/t1", "A/B/t2"]);
    }

    #[test]
    fn test_partition_properties() {
        for n in 0..40 {
            let tests = ids(n);
            for count in 1..9 {
                let batches = plan_batches(&tests, count);

                // union is the input, no test appears twice
                let flat: Vec<&TestId> = batches.iter().flat_map(|b| b.selection.tests()).collect();
                assert_eq!(flat.len(), n);
                let unique: BTreeSet<&TestId> = flat.iter().copied().collect();
                assert_eq!(unique.len(), n);
                assert_eq!(flat, tests.iter().collect::<Vec<_>>());

                assert!(batches.len() <= count);
                assert!(batches.iter().all(|b| !b.selection.tests().is_empty()));

                let sizes: Vec<usize> = batches.iter().map(|b| b.selection.tests().len()).collect();
                if let (Some(max), Some(min)) = (sizes.iter().max(), sizes.iter().min()) {
                    assert!(max - min <= 1);
                }

                assert_eq!(batches, plan_batches(&tests, count));
            }
        }
    }

    #[test]
    fn test_selection_display() {
        assert_eq!(TestSelection::All.to_string(), "all tests");
        assert_eq!(TestSelection::Only(ids(1)).to_string(), "1 test");
        assert_eq!(TestSelection::Only(ids(4)).to_string(), "4 tests");
    }
}
