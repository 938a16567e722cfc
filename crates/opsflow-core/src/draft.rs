//! Per-session lock draft
//!
//! Holds what the operator has typed for the selected task between requests.

use crate::error::LockError;
use crate::types::{Evidence, TaskId};

/// Draft for the selected task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDraft {
    task_id: Option<TaskId>,
    commentary: String,
    evidence: Evidence,
    locking: bool,
}

impl LockDraft {
    /// Empty draft
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected task
    #[inline]
    #[must_use]
    pub fn task_id(&self) -> Option<&TaskId> {
        self.task_id.as_ref()
    }

    /// Commentary typed so far
    #[inline]
    #[must_use]
    pub fn commentary(&self) -> &str {
        &self.commentary
    }

    /// Evidence collected so far
    #[inline]
    #[must_use]
    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    /// Check if a lock is outstanding
    #[inline]
    #[must_use]
    pub fn is_locking(&self) -> bool {
        self.locking
    }

    /// Select a task. Selecting a different task discards the old draft;
    /// re-selecting the current one keeps it.
    pub fn select(&mut self, task_id: TaskId) {
        if self.task_id.as_ref() != Some(&task_id) {
            self.commentary.clear();
            self.evidence = Evidence::new();
        }
        self.task_id = Some(task_id);
    }

    /// Replace the commentary
    pub fn set_commentary(&mut self, commentary: impl Into<String>) {
        self.commentary = commentary.into();
    }

    /// Append an evidence link; anything but an `http`/`https` URL is ignored
    pub fn add_evidence(&mut self, link: &str) -> bool {
        self.evidence.add(link)
    }

    /// Drop the evidence link at `index`; out of range is a no-op
    pub fn remove_evidence(&mut self, index: usize) -> Option<String> {
        self.evidence.remove(index)
    }

    /// Forget the selection and everything typed
    pub fn clear(&mut self) {
        let locking = self.locking;
        *self = Self::default();
        self.locking = locking;
    }

    /// Mark a lock as started
    ///
    /// # Errors
    /// `LockError::InFlight` if a lock from this draft is still outstanding
    pub fn begin_lock(&mut self) -> Result<(), LockError> {
        if self.locking {
            return Err(LockError::InFlight);
        }
        self.locking = true;
        Ok(())
    }

    /// Mark the outstanding lock as finished; clears the draft on success
    pub fn finish_lock(&mut self, succeeded: bool) {
        self.locking = false;
        if succeeded {
            self.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn select_other_task_resets() {
        let mut draft = LockDraft::new();
        draft.select(TaskId::new("1"));
        draft.set_commentary("checked");
        draft.add_evidence("https://drive.example/a");

        draft.select(TaskId::new("1"));
        assert_eq!(draft.commentary(), "checked");
        assert_eq!(draft.evidence().links(), ["https://drive.example/a".to_string()]);

        draft.select(TaskId::new("2"));
        assert_eq!(draft.commentary(), "");
        assert!(draft.evidence().is_empty());
        assert_eq!(draft.task_id(), Some(&TaskId::new("2")));
    }

    #[test]
    fn second_lock_is_in_flight() {
        let mut draft = LockDraft::new();
        draft.begin_lock().unwrap();
        assert!(matches!(draft.begin_lock(), Err(LockError::InFlight)));
        draft.finish_lock(false);
        assert!(draft.begin_lock().is_ok());
    }

    #[test]
    fn successful_lock_clears_draft() {
        let mut draft = LockDraft::new();
        draft.select(TaskId::new("1"));
        draft.set_commentary("done");
        draft.begin_lock().unwrap();
        draft.finish_lock(true);
        assert_eq!(draft, LockDraft::new());
    }

    #[test]
    fn clear_keeps_in_flight_marker() {
        let mut draft = LockDraft::new();
        draft.select(TaskId::new("1"));
        draft.begin_lock().unwrap();
        draft.clear();
        assert!(draft.task_id().is_none());
        assert!(draft.is_locking());
    }

    proptest! {
        #[test]
        fn prop_evidence_tracks_a_vec(
            links in proptest::collection::vec(
                "https?://[a-z]{1,6}|[a-z]{0,6}|javascript:[a-z]{0,4}",
                0..12,
            ),
            removals in proptest::collection::vec(0usize..16, 0..12),
        ) {
            let mut draft = LockDraft::new();
            let mut model: Vec<String> = Vec::new();
            for link in &links {
                if draft.add_evidence(link) {
                    model.push(link.clone());
                }
            }
            for index in removals {
                let removed = draft.remove_evidence(index);
                let expected = (index < model.len()).then(|| model.remove(index));
                prop_assert_eq!(removed, expected);
            }
            prop_assert_eq!(draft.evidence().links(), model.as_slice());
            prop_assert!(draft.evidence().links().iter().all(|l| Evidence::is_web_link(l)));
        }
    }
}
