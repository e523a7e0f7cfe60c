//! Hierarchical execution position.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a frame in the execution tree, e.g. `0.3.0`.
///
/// Each level is a sibling index. `down` enters a new nesting level at
/// index 0, `up` leaves it, `forward` moves to the next sibling. Two
/// branches of the same round never share a path value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionPath {
    levels: Vec<u32>,
}

impl Default for ExecutionPath {
    fn default() -> Self {
        Self { levels: vec![0] }
    }
}

impl ExecutionPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down(&mut self) {
        self.levels.push(0);
    }

    /// Leave the current level. The root level is never popped.
    pub fn up(&mut self) {
        if self.levels.len() > 1 {
            self.levels.pop();
        }
    }

    pub fn forward(&mut self) {
        if let Some(last) = self.levels.last_mut() {
            *last += 1;
        }
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    pub fn current_path(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.levels.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}
