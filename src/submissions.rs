use super::*;

/// Randomness values each client has already submitted for the current
/// work unit. Cleared wholesale whenever new work goes out, so a nonce
/// only counts as a duplicate within one epoch.
pub(crate) struct SubmissionSet {
    seen: HashMap<u64, Vec<String>>,
}

impl SubmissionSet {
    pub(crate) fn new() -> Self {
        Self {
            seen: HashMap::new(),
        }
    }

    pub(crate) fn is_duplicate(&self, client_id: u64, randomness: &str) -> bool {
        self.seen
            .get(&client_id)
            .is_some_and(|submitted| submitted.iter().any(|seen| seen == randomness))
    }

    pub(crate) fn record(&mut self, client_id: u64, randomness: String) {
        self.seen.entry(client_id).or_default().push(randomness);
    }

    pub(crate) fn reset(&mut self) {
        self.seen.clear();
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_set_has_no_duplicates() {
        let set = SubmissionSet::new();
        assert!(!set.is_duplicate(1, "aa"));
        assert!(set.is_empty());
    }

    #[test]
    fn recorded_randomness_is_a_duplicate() {
        let mut set = SubmissionSet::new();
        set.record(1, "aa".into());

        assert!(set.is_duplicate(1, "aa"));
        assert!(!set.is_duplicate(1, "bb"));
    }

    #[test]
    fn clients_are_tracked_independently() {
        let mut set = SubmissionSet::new();
        set.record(1, "aa".into());

        assert!(!set.is_duplicate(2, "aa"));
    }

    #[test]
    fn reset_clears_every_client() {
        let mut set = SubmissionSet::new();
        set.record(1, "aa".into());
        set.record(2, "bb".into());

        set.reset();

        assert!(set.is_empty());
        assert!(!set.is_duplicate(1, "aa"));
        assert!(!set.is_duplicate(2, "bb"));
    }

    #[test]
    fn records_keep_their_order() {
        let mut set = SubmissionSet::new();
        set.record(1, "aa".into());
        set.record(1, "bb".into());
        set.record(1, "aa".into());

        assert_eq!(set.seen[&1], vec!["aa", "bb", "aa"]);
    }
}
