//! Locally unique device labels.
//!
//! Two managers may discover devices with the same advertised name. Every
//! device gets a display label that is unique across the whole application,
//! handed out by a shared [`NamingAuthority`].

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// Hands out labels that no other live device uses.
pub trait NamingAuthority: Send + Sync {
    /// Reserve `proposed`, or a suffixed variant if it is taken.
    fn unique_label(&self, proposed: &str) -> String;

    /// Make a label available again.
    fn release(&self, label: &str);
}

/// Default authority: `CCD`, `CCD_1`, `CCD_2`, ...
#[derive(Debug, Default)]
pub struct LabelRegistry {
    taken: Mutex<HashSet<String>>,
}

impl LabelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_taken(&self, label: &str) -> bool {
        self.taken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(label)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.taken.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NamingAuthority for LabelRegistry {
    fn unique_label(&self, proposed: &str) -> String {
        let mut taken = self.taken.lock().unwrap_or_else(PoisonError::into_inner);

        let mut label = proposed.to_string();
        let mut suffix = 1;
        while taken.contains(&label) {
            label = format!("{proposed}_{suffix}");
            suffix += 1;
        }

        debug!(proposed, label = %label, "Reserved device label");
        taken.insert(label.clone());
        label
    }

    fn release(&self, label: &str) {
        if self
            .taken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(label)
        {
            debug!(label, "Released device label");
        }
    }
}
