// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Errors returned when taking a snapshot or replaying one.
//!
//! Recording never fails from the caller's point of view: a malformed call is logged and
//! dropped. Only the operations that hand state back out can refuse.

/// A snapshot of a command buffer could not be taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// The command buffer has never been seen by the tracker, or it has been freed since.
    #[error("the command buffer is not tracked")]
    UnknownCommandBuffer,

    /// The command buffer is tracked, but the pool it was allocated from is not known, so there
    /// is no way to tell whether its state is still valid.
    #[error("the command pool owning the command buffer is not known")]
    UntrackedPool,

    /// The owning pool is known, but has no epoch recorded.
    #[error("the command pool owning the command buffer has no epoch")]
    MissingPoolEpoch,

    /// The owning pool was reset after the command buffer was last begun.
    #[error(
        "the command buffer was begun at epoch {begin_epoch}, but its pool has since been reset \
        to epoch {pool_epoch}"
    )]
    Stale { begin_epoch: u64, pool_epoch: u64 },
}

/// A replay could not be performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    /// No function table was installed with
    /// [`ShadowTracker::set_function_table`](crate::ShadowTracker::set_function_table).
    #[error("no function table has been installed")]
    MissingFunctionTable,

    /// The source command buffer's state could not be captured.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[cfg(test)]
mod tests {
    use super::{ReplayError, SnapshotError};

    #[test]
    fn display() {
        let err = SnapshotError::Stale {
            begin_epoch: 0,
            pool_epoch: 1,
        };
        assert_eq!(
            err.to_string(),
            "the command buffer was begun at epoch 0, but its pool has since been reset to epoch 1",
        );

        let err = ReplayError::from(SnapshotError::UntrackedPool);
        assert_eq!(err, ReplayError::Snapshot(SnapshotError::UntrackedPool));
        assert_eq!(err.to_string(), SnapshotError::UntrackedPool.to_string());
    }
}
