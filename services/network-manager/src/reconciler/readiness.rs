//! Readiness aggregation.
//!
//! The network is ready when every instance of the applied snapshot has
//! signalled ready. The set never holds an address outside that snapshot.

use std::collections::BTreeSet;

use trellis_id::Address;

#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: BTreeSet<Address>,
}

impl Readiness {
    /// Record `instance` as ready. Ignored unless it belongs to `expected`.
    ///
    /// Returns true if the set changed.
    pub fn mark_ready(&mut self, instance: &Address, expected: &BTreeSet<Address>) -> bool {
        expected.contains(instance) && self.ready.insert(instance.clone())
    }

    /// Record `instance` as no longer ready. Returns true if the set changed.
    pub fn mark_unready(&mut self, instance: &Address) -> bool {
        self.ready.remove(instance)
    }

    /// Drop every address not in `expected`.
    pub fn retain(&mut self, expected: &BTreeSet<Address>) {
        self.ready.retain(|address| expected.contains(address));
    }

    /// True when the ready set equals `expected`.
    pub fn is_complete(&self, expected: &BTreeSet<Address>) -> bool {
        &self.ready == expected
    }

    pub fn ready(&self) -> &BTreeSet<Address> {
        &self.ready
    }

    pub fn contains(&self, instance: &Address) -> bool {
        self.ready.contains(instance)
    }

    pub fn clear(&mut self) {
        self.ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn addrs(list: &[&str]) -> BTreeSet<Address> {
        list.iter().map(|s| Address::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_toggle_sequence() {
        let expected = addrs(&["n.a-1", "n.a-2"]);
        let a1 = Address::parse("n.a-1").unwrap();
        let a2 = Address::parse("n.a-2").unwrap();
        let mut readiness = Readiness::default();

        assert!(readiness.mark_ready(&a1, &expected));
        assert!(!readiness.is_complete(&expected));

        assert!(readiness.mark_ready(&a2, &expected));
        assert!(readiness.is_complete(&expected));

        assert!(readiness.mark_unready(&a1));
        assert!(!readiness.is_complete(&expected));
    }

    #[test]
    fn test_duplicate_signals_are_noops() {
        let expected = addrs(&["n.a-1"]);
        let a1 = Address::parse("n.a-1").unwrap();
        let mut readiness = Readiness::default();

        assert!(readiness.mark_ready(&a1, &expected));
        assert!(!readiness.mark_ready(&a1, &expected));
        assert!(readiness.mark_unready(&a1));
        assert!(!readiness.mark_unready(&a1));
    }

    #[rstest]
    #[case(&[], &[], true)]
    #[case(&["n.a-1"], &["n.a-1"], true)]
    #[case(&["n.a-1"], &["n.a-1", "n.b-1"], false)]
    #[case(&[], &["n.a-1"], false)]
    fn test_completeness(#[case] ready: &[&str], #[case] expected: &[&str], #[case] complete: bool) {
        let expected = addrs(expected);
        let mut readiness = Readiness::default();
        for address in addrs(ready) {
            readiness.mark_ready(&address, &expected);
        }
        assert_eq!(readiness.is_complete(&expected), complete);
    }

    #[test]
    fn test_outsiders_are_rejected_and_pruned() {
        let old = addrs(&["n.a-1", "n.b-1"]);
        let mut readiness = Readiness::default();
        for address in &old {
            readiness.mark_ready(address, &old);
        }
        assert!(!readiness.mark_ready(&Address::parse("n.z-1").unwrap(), &old));

        let new = addrs(&["n.a-1", "n.c-1"]);
        readiness.retain(&new);
        assert_eq!(readiness.ready(), &addrs(&["n.a-1"]));
        assert!(!readiness.is_complete(&new));
    }
}
