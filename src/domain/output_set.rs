//! Output Set (C3).
//!
//! Per-task set of named outputs with completion bits. Standard output
//! names line up with the transition table in §4.4; anything else is a
//! custom output defined by the task's triggering configuration.

use std::collections::BTreeMap;

pub const STANDARD_OUTPUTS: [&str; 6] = [
    "submitted",
    "started",
    "succeeded",
    "failed",
    "submit-failed",
    "expired",
];

/// A task's named outputs and their completion state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSet {
    completion: BTreeMap<String, bool>,
}

impl OutputSet {
    pub fn new() -> Self {
        let mut completion = BTreeMap::new();
        for name in STANDARD_OUTPUTS {
            completion.insert(name.to_string(), false);
        }
        Self { completion }
    }

    pub fn is_standard(name: &str) -> bool {
        STANDARD_OUTPUTS.contains(&name)
    }

    /// Mark a message as resolving a named output.
    ///
    /// Returns true iff this call *changed* the output from incomplete
    /// to complete (the caller uses this to decide whether the message
    /// "resolved an as-yet-unsatisfied named output").
    pub fn set_msg_trg_completion(&mut self, message: &str, is_completed: bool) -> bool {
        let was_incomplete = !self.completion.get(message).copied().unwrap_or(false);
        self.completion.insert(message.to_string(), is_completed);
        was_incomplete && is_completed
    }

    pub fn set_completion(&mut self, name: &str, completed: bool) {
        self.completion.insert(name.to_string(), completed);
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completion.get(name).copied().unwrap_or(false)
    }

    pub fn set_all_incomplete(&mut self) {
        for v in self.completion.values_mut() {
            *v = false;
        }
    }

    pub fn all_completed(&self) -> bool {
        self.completion.values().all(|v| *v)
    }

    pub fn get_not_completed(&self) -> Vec<&str> {
        self.completion
            .iter()
            .filter(|(_, v)| !**v)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_set_has_all_standard_outputs_incomplete() {
        let out = OutputSet::new();
        assert!(!out.all_completed());
        assert_eq!(out.get_not_completed().len(), STANDARD_OUTPUTS.len());
    }

    #[test]
    fn set_msg_trg_completion_reports_transition_only() {
        let mut out = OutputSet::new();
        assert!(out.set_msg_trg_completion("submitted", true));
        // Already complete: no further transition reported.
        assert!(!out.set_msg_trg_completion("submitted", true));
    }

    #[test]
    fn custom_outputs_are_not_standard() {
        assert!(OutputSet::is_standard("succeeded"));
        assert!(!OutputSet::is_standard("data-ready"));
        let mut out = OutputSet::new();
        out.set_completion("data-ready", true);
        assert!(out.is_completed("data-ready"));
    }

    #[test]
    fn set_all_incomplete_resets_every_output() {
        let mut out = OutputSet::new();
        out.set_completion("submitted", true);
        out.set_completion("started", true);
        out.set_all_incomplete();
        assert!(!out.is_completed("submitted"));
        assert!(!out.is_completed("started"));
    }
}
