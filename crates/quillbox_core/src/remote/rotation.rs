//! Retention policy for historical snapshots.

use crate::remote::RemoteObjectHandle;

/// Historical snapshots kept after each backup.
pub const MAX_BACKUPS: usize = 3;

/// Keep/delete split over a newest-first listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan<'a> {
    pub keep: &'a [RemoteObjectHandle],
    pub delete: &'a [RemoteObjectHandle],
}

/// Pure retention decision; performs no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    max_backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(MAX_BACKUPS)
    }
}

impl RotationPolicy {
    pub fn new(max_backups: usize) -> Self {
        Self { max_backups }
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    /// Splits `newest_first` at the retention count.
    pub fn plan<'a>(&self, newest_first: &'a [RemoteObjectHandle]) -> RotationPlan<'a> {
        let split = self.max_backups.min(newest_first.len());
        let (keep, delete) = newest_first.split_at(split);
        RotationPlan { keep, delete }
    }
}
