// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Shadow-state tracking and partial replay for Vulkan command buffers.
//!
//! A layer that splices its own work into a command stream it doesn't own has to put the GPU
//! state back the way the application left it afterwards, and the driver won't tell it what that
//! state was. This crate keeps a mirror of it instead.
//!
//! # Brief summary
//!
//! - The [`ShadowTracker`] receives every state-setting call the application records, through the
//!   `on_*` methods (or the `on_*_raw` variants, which take native pointer/count pairs straight
//!   from an intercepted entry point). Each command buffer gets a [`CommandBufferState`], created
//!   on first use and wiped on begin and reset.
//!
//! - Command pools are versioned with epochs. Resetting a pool invalidates every command buffer
//!   allocated from it until that command buffer is begun again, so state recorded before the
//!   reset is never replayed.
//!
//! - [`ShadowTracker::try_get_snapshot`] copies a command buffer's state out from under the lock.
//!   The copy can be inspected or replayed without blocking recording threads.
//!
//! - [`replay_from_snapshot`](crate::replay::replay_from_snapshot) reissues a subset of a
//!   snapshot, selected by [`ReplayParams`], onto another command buffer through a
//!   [`CommandRecorder`]. [`VulkanCmdFns`] is the implementation that calls real Vulkan entry
//!   points.
//!
//! # Example
//!
//! ```no_run
//! use vkshadow::{ash::vk, ReplayParams, ShadowTracker, VulkanCmdFns};
//! use std::sync::Arc;
//!
//! # let (pool, app_cmd, our_cmd) = (vk::CommandPool::null(), vk::CommandBuffer::null(), vk::CommandBuffer::null());
//! # let fns = VulkanCmdFns::default();
//! let tracker = ShadowTracker::new();
//! tracker.set_function_table(Arc::new(fns));
//!
//! // Called from the intercepted entry points.
//! tracker.on_allocate_command_buffers(pool, &[app_cmd]);
//! tracker.on_begin(app_cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
//!
//! // After splicing our own commands into `our_cmd`, restore what the application expects.
//! let params = ReplayParams {
//!     required_graphics_set_mask: 0b11,
//!     ..Default::default()
//! };
//! let _ = unsafe { tracker.capture_and_replay(app_cmd, our_cmd, &params) };
//! ```

pub use crate::{
    error::{ReplayError, SnapshotError},
    fns::{CommandRecorder, VulkanCmdFns},
    replay::ReplayParams,
    state::CommandBufferState,
    tracker::{CommandBufferSnapshot, ShadowTracker},
};
pub use ash;
use ash::vk;


mod epoch;
pub mod error;
pub mod fns;
mod hooks;
pub mod replay;
pub mod slots;
pub mod state;
mod tracker;

/// Number of descriptor set slots tracked per bind point.
pub const MAX_DESCRIPTOR_SETS: u32 = 32;

/// Number of viewport slots tracked per command buffer.
pub const MAX_VIEWPORTS: u32 = 16;

/// Number of scissor slots tracked per command buffer.
pub const MAX_SCISSORS: u32 = 16;

/// Number of vertex buffer bindings tracked per command buffer.
pub const MAX_VERTEX_BUFFERS: u32 = 32;

/// Largest push constant payload that is stored. Bigger updates are truncated.
pub const MAX_PUSH_CONSTANT_BYTES: u32 = 256;

/// Compute bind calls carrying more dynamic offsets than this are considered corrupt and are not
/// replayed.
pub const MAX_REPLAYED_DYNAMIC_OFFSETS: usize = 1024;

/// A pipeline bind point whose bindings are tracked.
///
/// Ray tracing and vendor bind points are not tracked. Calls made on them are dropped rather than
/// folded into the state of a known bind point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BindPoint {
    Graphics = 0,
    Compute = 1,
}

impl BindPoint {
    /// The number of tracked bind points.
    pub const COUNT: usize = 2;

    /// Maps a Vulkan bind point to a tracked one, or returns `None` if it isn't tracked.
    pub fn from_vk(bind_point: vk::PipelineBindPoint) -> Option<Self> {
        match bind_point {
            vk::PipelineBindPoint::GRAPHICS => Some(BindPoint::Graphics),
            vk::PipelineBindPoint::COMPUTE => Some(BindPoint::Compute),
            vk::PipelineBindPoint::RAY_TRACING_KHR => {
                tracing::debug!("ray tracing bind point is not tracked");
                None
            }
            _ => {
                tracing::warn!(
                    ?bind_point,
                    "unknown pipeline bind point, ignoring it to avoid corrupting tracked state",
                );
                None
            }
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

impl From<BindPoint> for vk::PipelineBindPoint {
    #[inline]
    fn from(val: BindPoint) -> Self {
        match val {
            BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
            BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }
}
