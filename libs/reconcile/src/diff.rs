//! Component set differences.

use std::collections::BTreeSet;

/// Difference between the running and the desired component names.
///
/// Components present on both sides are `retained` and left untouched:
/// structural changes inside a retained component are not reconciled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentDiff {
    /// Running but no longer desired.
    pub removed: BTreeSet<String>,

    /// Desired but not running.
    pub added: BTreeSet<String>,

    /// Both running and desired.
    pub retained: BTreeSet<String>,
}

impl ComponentDiff {
    pub fn between(running: &BTreeSet<String>, desired: &BTreeSet<String>) -> Self {
        Self {
            removed: running.difference(desired).cloned().collect(),
            added: desired.difference(running).cloned().collect(),
            retained: running.intersection(desired).cloned().collect(),
        }
    }

    /// Returns true if nothing needs to be deployed or undeployed.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(&["a", "b"], &["b", "c"], &["a"], &["c"], &["b"])]
    #[case(&[], &["a"], &[], &["a"], &[])]
    #[case(&["a"], &[], &["a"], &[], &[])]
    #[case(&["a", "b"], &["a", "b"], &[], &[], &["a", "b"])]
    fn test_diff(
        #[case] running: &[&str],
        #[case] desired: &[&str],
        #[case] removed: &[&str],
        #[case] added: &[&str],
        #[case] retained: &[&str],
    ) {
        let diff = ComponentDiff::between(&set(running), &set(desired));
        assert_eq!(diff.removed, set(removed));
        assert_eq!(diff.added, set(added));
        assert_eq!(diff.retained, set(retained));
    }

    #[test]
    fn test_noop() {
        let same = set(&["a"]);
        assert!(ComponentDiff::between(&same, &same).is_noop());
        assert!(!ComponentDiff::between(&same, &set(&["b"])).is_noop());
    }
}
