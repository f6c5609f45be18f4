//! Prerequisite contract (opaque to the core, per spec §3).
//!
//! The prerequisite/output/triggering machinery itself is out of
//! scope; this module defines only the narrow interface `TaskState`
//! calls into.

use std::collections::HashMap;

/// Something a task depends on: satisfied by matching output messages
/// from upstream tasks.
pub trait Prerequisite: std::fmt::Debug {
    /// Offer a set of `(task-output-identity, bool)` pairs; the
    /// prerequisite updates its own satisfaction if any match.
    fn satisfy_me(&mut self, outputs: &HashMap<String, bool>);

    fn is_satisfied(&self) -> bool;

    fn set_satisfied(&mut self);

    fn set_not_satisfied(&mut self);

    /// The `(task-identity, output-name)` pairs this prerequisite
    /// resolved against, for diagnostics/logging.
    fn get_resolved_dependencies(&self) -> Vec<String>;

    /// Cycle points this prerequisite's dependencies target, used by
    /// out-of-scope scheduling machinery — the core treats this as
    /// opaque data to pass through.
    fn get_target_points(&self) -> Vec<String>;
}

/// A minimal prerequisite implementation good enough to exercise
/// `TaskState` in isolation and in tests: satisfied by exact string-key
/// match against the offered outputs map.
#[derive(Debug, Clone, Default)]
pub struct SimplePrerequisite {
    keys: Vec<String>,
    satisfied: bool,
    target_points: Vec<String>,
}

impl SimplePrerequisite {
    pub fn new(keys: Vec<String>, target_points: Vec<String>) -> Self {
        Self {
            keys,
            satisfied: false,
            target_points,
        }
    }
}

impl Prerequisite for SimplePrerequisite {
    fn satisfy_me(&mut self, outputs: &HashMap<String, bool>) {
        if self.satisfied {
            return;
        }
        if self
            .keys
            .iter()
            .all(|k| outputs.get(k).copied().unwrap_or(false))
        {
            self.satisfied = true;
        }
    }

    fn is_satisfied(&self) -> bool {
        self.satisfied
    }

    fn set_satisfied(&mut self) {
        self.satisfied = true;
    }

    fn set_not_satisfied(&mut self) {
        self.satisfied = false;
    }

    fn get_resolved_dependencies(&self) -> Vec<String> {
        self.keys.clone()
    }

    fn get_target_points(&self) -> Vec<String> {
        self.target_points.clone()
    }
}
