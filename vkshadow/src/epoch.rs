// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Command pool epochs.
//!
//! Resetting a pool implicitly resets every command buffer allocated from it, without the
//! application calling anything per command buffer. Rather than walking those command buffers,
//! each pool carries an epoch which is bumped on reset, and each command buffer remembers the
//! epoch of its pool when it was last begun. A command buffer whose remembered epoch is behind
//! its pool's is stale.

use crate::error::SnapshotError;
use ash::vk;
use foldhash::HashMap;

#[derive(Debug, Default)]
pub(crate) struct PoolEpochRegistry {
    /// Incremented on every pool reset, whichever pool it is.
    global_epoch: u64,
    pool_epochs: HashMap<vk::CommandPool, u64>,
    owners: HashMap<vk::CommandBuffer, vk::CommandPool>,
}

/// The epoch a command buffer is stamped with as it is begun.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BeginEpoch {
    /// The current epoch of the owning pool.
    Pool(u64),
    /// The owning pool had no epoch, so it was given the global one.
    Initialized { pool: vk::CommandPool, epoch: u64 },
    /// The command buffer was never seen being allocated.
    Untracked,
}

impl BeginEpoch {
    #[inline]
    pub(crate) fn epoch(self) -> u64 {
        match self {
            BeginEpoch::Pool(epoch) | BeginEpoch::Initialized { epoch, .. } => epoch,
            BeginEpoch::Untracked => 0,
        }
    }
}

// Nothing in here logs: the registry is only ever used under the tracker's lock, and the tracker
// logs the outcome once the lock is released.
impl PoolEpochRegistry {
    /// Records that `command_buffers` were allocated from `pool`, and returns the pool's epoch.
    /// A pool seen for the first time starts at the global epoch.
    pub(crate) fn register_allocation(
        &mut self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) -> u64 {
        let epoch = *self.pool_epochs.entry(pool).or_insert(self.global_epoch);

        self.owners
            .extend(command_buffers.iter().map(|&command_buffer| (command_buffer, pool)));

        epoch
    }

    pub(crate) fn begin_epoch(&mut self, command_buffer: vk::CommandBuffer) -> BeginEpoch {
        let Some(&pool) = self.owners.get(&command_buffer) else {
            return BeginEpoch::Untracked;
        };

        if let Some(&epoch) = self.pool_epochs.get(&pool) {
            return BeginEpoch::Pool(epoch);
        }

        let epoch = self.global_epoch;
        self.pool_epochs.insert(pool, epoch);

        BeginEpoch::Initialized { pool, epoch }
    }

    /// Bumps the global epoch and gives it to `pool`, returning it.
    pub(crate) fn reset_pool(&mut self, pool: vk::CommandPool) -> u64 {
        self.global_epoch += 1;
        self.pool_epochs.insert(pool, self.global_epoch);

        self.global_epoch
    }

    #[inline]
    pub(crate) fn pool_epoch(&self, pool: vk::CommandPool) -> Option<u64> {
        self.pool_epochs.get(&pool).copied()
    }

    pub(crate) fn forget_command_buffer(&mut self, command_buffer: vk::CommandBuffer) {
        self.owners.remove(&command_buffer);
    }

    /// Forgets `pool`, returning the command buffers that were allocated from it.
    pub(crate) fn destroy_pool(&mut self, pool: vk::CommandPool) -> Vec<vk::CommandBuffer> {
        let mut freed = Vec::new();

        self.owners.retain(|&command_buffer, &mut owner| {
            if owner == pool {
                freed.push(command_buffer);
                false
            } else {
                true
            }
        });
        self.pool_epochs.remove(&pool);

        freed
    }

    /// Checks that state recorded at `begin_epoch` is still valid for `command_buffer`.
    pub(crate) fn validate(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_epoch: u64,
    ) -> Result<(), SnapshotError> {
        let &pool = self
            .owners
            .get(&command_buffer)
            .ok_or(SnapshotError::UntrackedPool)?;
        let pool_epoch = self
            .pool_epoch(pool)
            .ok_or(SnapshotError::MissingPoolEpoch)?;

        if begin_epoch < pool_epoch {
            return Err(SnapshotError::Stale {
                begin_epoch,
                pool_epoch,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BeginEpoch, PoolEpochRegistry};
    use crate::error::SnapshotError;

    #[test]
    fn reset_invalidates_until_begin() {
        let pool = handle!(CommandPool, 1);
        let cmd = handle!(CommandBuffer, 10);
        let mut registry = PoolEpochRegistry::default();

        assert_eq!(registry.register_allocation(pool, &[cmd]), 0);
        assert_eq!(registry.pool_epoch(pool), Some(0));

        assert_eq!(registry.begin_epoch(cmd), BeginEpoch::Pool(0));
        let begin_epoch = registry.begin_epoch(cmd).epoch();
        assert_eq!(begin_epoch, 0);
        assert_eq!(registry.validate(cmd, begin_epoch), Ok(()));

        assert_eq!(registry.reset_pool(pool), 1);
        assert_eq!(
            registry.validate(cmd, begin_epoch),
            Err(SnapshotError::Stale {
                begin_epoch: 0,
                pool_epoch: 1,
            }),
        );

        let begin_epoch = registry.begin_epoch(cmd).epoch();
        assert_eq!(begin_epoch, 1);
        assert_eq!(registry.validate(cmd, begin_epoch), Ok(()));
    }

    #[test]
    fn allocation_does_not_reinitialize() {
        let pool_a = handle!(CommandPool, 1);
        let pool_b = handle!(CommandPool, 2);
        let mut registry = PoolEpochRegistry::default();

        registry.register_allocation(pool_a, &[handle!(CommandBuffer, 1)]);
        registry.reset_pool(pool_a);
        registry.reset_pool(pool_a);
        registry.register_allocation(pool_a, &[handle!(CommandBuffer, 2)]);
        assert_eq!(registry.pool_epoch(pool_a), Some(2));

        // A pool first seen now starts at the global counter.
        registry.register_allocation(pool_b, &[handle!(CommandBuffer, 3)]);
        assert_eq!(registry.pool_epoch(pool_b), Some(2));

        // Resetting one pool leaves the others alone.
        registry.reset_pool(pool_b);
        assert_eq!(registry.pool_epoch(pool_a), Some(2));
        assert_eq!(registry.pool_epoch(pool_b), Some(3));
        assert_eq!(registry.validate(handle!(CommandBuffer, 2), 2), Ok(()));
    }

    #[test]
    fn untracked_and_destroyed() {
        let pool = handle!(CommandPool, 1);
        let cmds = [handle!(CommandBuffer, 1), handle!(CommandBuffer, 2)];
        let mut registry = PoolEpochRegistry::default();

        assert_eq!(registry.begin_epoch(cmds[0]), BeginEpoch::Untracked);
        assert_eq!(
            registry.validate(cmds[0], 0),
            Err(SnapshotError::UntrackedPool),
        );

        registry.register_allocation(pool, &cmds);
        registry.forget_command_buffer(cmds[1]);
        assert_eq!(registry.begin_epoch(cmds[1]), BeginEpoch::Untracked);

        let freed = registry.destroy_pool(pool);
        assert_eq!(freed, [cmds[0]]);
        assert_eq!(registry.pool_epoch(pool), None);
        assert_eq!(registry.begin_epoch(cmds[0]), BeginEpoch::Untracked);
    }

    #[test]
    fn missing_pool_epoch() {
        let pool = handle!(CommandPool, 1);
        let cmd = handle!(CommandBuffer, 1);
        let mut registry = PoolEpochRegistry::default();

        registry.register_allocation(pool, &[cmd]);
        registry.reset_pool(handle!(CommandPool, 2));
        registry.pool_epochs.clear();

        assert_eq!(
            registry.validate(cmd, 0),
            Err(SnapshotError::MissingPoolEpoch),
        );

        // Begin initializes the missing epoch from the global counter.
        assert_eq!(
            registry.begin_epoch(cmd),
            BeginEpoch::Initialized { pool, epoch: 1 },
        );
        assert_eq!(registry.begin_epoch(cmd), BeginEpoch::Pool(1));
        assert_eq!(registry.pool_epoch(pool), Some(1));
    }
}
