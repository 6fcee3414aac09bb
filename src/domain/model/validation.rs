//! Per-object validation state shared by every resource kind.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Keys the validation state occupies in a resource's wire form.
///
/// They are stripped before an object is written to the backing store.
pub const VALIDATION_FIELDS: [&str; 3] = ["Validated", "Available", "Errors"];

/// Where an object is in the lifecycle pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    New,
    Filled,
    Validated,
    Saved,
    Rejected,
}

/// Validation flags and the aggregated violation list.
///
/// Both flags are recomputed on every validation pass; nothing here survives
/// a save because storage always receives the cleared form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Validation {
    pub validated: bool,
    pub available: bool,
    pub errors: Vec<String>,
    #[serde(skip)]
    force_change: bool,
    #[serde(skip)]
    state: LifecycleState,
}

impl Validation {
    pub fn add_error(&mut self, err: impl Display) {
        self.errors.push(err.to_string());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Marks the object valid if no violation has been recorded so far.
    pub fn set_valid(&mut self) -> bool {
        self.validated = self.errors.is_empty();
        self.validated
    }

    /// Marks the object available if it is valid and nothing was recorded since.
    pub fn set_available(&mut self) -> bool {
        self.available = self.validated && self.errors.is_empty();
        self.available
    }

    /// Valid and available: the gate for persisting.
    pub fn useable(&self) -> bool {
        self.validated && self.available
    }

    /// Drops flags and errors, keeping the force-change flag and lifecycle state.
    pub fn clear(&mut self) {
        self.validated = false;
        self.available = false;
        self.errors.clear();
    }

    /// Takes a copy of the current state and clears it.
    pub fn save(&mut self) -> Validation {
        let saved = self.clone();
        self.clear();
        saved
    }

    pub fn restore(&mut self, saved: Validation) {
        *self = saved;
    }

    pub fn force_change(&mut self) {
        self.force_change = true;
    }

    pub fn change_forced(&self) -> bool {
        self.force_change
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn mark(&mut self, state: LifecycleState) {
        self.state = state;
    }

    /// Blank state for a sibling instance: only the force-change flag carries over.
    pub fn inherit(&self) -> Validation {
        Validation {
            force_change: self.force_change,
            ..Validation::default()
        }
    }
}
