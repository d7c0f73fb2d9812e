// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    epoch::{BeginEpoch, PoolEpochRegistry},
    error::{ReplayError, SnapshotError},
    fns::CommandRecorder,
    replay::{replay_from_snapshot, ReplayParams},
    state::{
        CommandBufferState, DescriptorBindCall, IndexBufferBinding, PushConstantEntry,
        StencilOpState,
    },
    BindPoint,
};
use ash::vk;
use foldhash::HashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::{fmt, ops::Deref, sync::Arc};

/// Mirrors the state recorded into command buffers.
///
/// The `on_*` methods are meant to be called from the intercepted Vulkan entry points, with the
/// same arguments, after the real command has been recorded. Any thread may call any method.
///
/// State for a command buffer is created the first time it is mentioned, even by a command other
/// than begin. Commands on a command buffer that was never seen being allocated are still
/// tracked, but its state can't be snapshotted, since there is no way to tell whether its pool
/// was reset in the meantime.
pub struct ShadowTracker {
    inner: Mutex<TrackerInner>,
    fns: RwLock<Option<Arc<dyn CommandRecorder>>>,
}

#[derive(Default)]
struct TrackerInner {
    states: HashMap<vk::CommandBuffer, CommandBufferState>,
    pools: PoolEpochRegistry,
}

impl ShadowTracker {
    /// Creates an empty tracker, without a function table.
    #[inline]
    pub fn new() -> Self {
        ShadowTracker {
            inner: Mutex::new(TrackerInner::default()),
            fns: RwLock::new(None),
        }
    }

    /// Installs the function table that [`capture_and_replay`](Self::capture_and_replay) records
    /// with, replacing any previous one.
    pub fn set_function_table(&self, fns: Arc<dyn CommandRecorder>) {
        *self.fns.write() = Some(fns);
    }

    /// Returns whether a function table has been installed.
    #[inline]
    pub fn has_function_table(&self) -> bool {
        self.fns.read().is_some()
    }

    /// Returns whether `command_buffer` has state.
    #[inline]
    pub fn is_tracked(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.inner.lock().states.contains_key(&command_buffer)
    }

    /// Returns the number of command buffers that have state.
    #[inline]
    pub fn tracked_count(&self) -> usize {
        self.inner.lock().states.len()
    }

    /// Returns the current epoch of `pool`, or `None` if the pool is not known.
    #[inline]
    pub fn pool_epoch(&self, pool: vk::CommandPool) -> Option<u64> {
        self.inner.lock().pools.pool_epoch(pool)
    }

    /// Returns the layout `image` was last transitioned to in `command_buffer`.
    pub fn image_layout(
        &self,
        command_buffer: vk::CommandBuffer,
        image: vk::Image,
    ) -> Option<vk::ImageLayout> {
        self.inner
            .lock()
            .states
            .get(&command_buffer)
            .and_then(|state| state.image_layout(image))
    }

    fn with_state<R>(
        &self,
        command_buffer: vk::CommandBuffer,
        f: impl FnOnce(&mut CommandBufferState) -> R,
    ) -> R {
        let mut inner = self.inner.lock();
        let state = inner
            .states
            .entry(command_buffer)
            .or_insert_with(CommandBufferState::new);

        f(state)
    }

    /// Records a `vkAllocateCommandBuffers`, remembering which pool each command buffer belongs
    /// to. No state is created until a command buffer is used.
    pub fn on_allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let epoch = self
            .inner
            .lock()
            .pools
            .register_allocation(pool, command_buffers);

        tracing::debug!(
            ?pool,
            count = command_buffers.len(),
            epoch,
            "allocated command buffers",
        );
    }

    /// Records a `vkBeginCommandBuffer`. Wipes the state of `command_buffer` and stamps it with
    /// the current epoch of its pool.
    pub fn on_begin(&self, command_buffer: vk::CommandBuffer, flags: vk::CommandBufferUsageFlags) {
        let begin_epoch = {
            let mut inner = self.inner.lock();
            let TrackerInner { states, pools } = &mut *inner;
            let begin_epoch = pools.begin_epoch(command_buffer);

            states
                .entry(command_buffer)
                .or_insert_with(CommandBufferState::new)
                .begin(flags, begin_epoch.epoch());

            begin_epoch
        };

        match begin_epoch {
            BeginEpoch::Pool(_) => {}
            BeginEpoch::Initialized { pool, epoch } => tracing::warn!(
                ?command_buffer,
                ?pool,
                epoch,
                "command pool had no epoch when one of its command buffers was begun",
            ),
            BeginEpoch::Untracked => tracing::warn!(
                ?command_buffer,
                "command buffer was begun but never seen being allocated, its state will be \
                recorded but can't be replayed",
            ),
        }
    }

    /// Records a `vkEndCommandBuffer`.
    pub fn on_end(&self, command_buffer: vk::CommandBuffer) {
        if let Some(state) = self.inner.lock().states.get_mut(&command_buffer) {
            state.recording = false;
        }
    }

    /// Records a `vkResetCommandBuffer`, returning the state of `command_buffer` to its default.
    pub fn on_reset(&self, command_buffer: vk::CommandBuffer) {
        if let Some(state) = self.inner.lock().states.get_mut(&command_buffer) {
            state.reset();
        }
    }

    /// Invalidates the state of every command buffer allocated from `pool`, until each is begun
    /// again.
    pub fn on_reset_pool(&self, pool: vk::CommandPool) {
        let epoch = self.inner.lock().pools.reset_pool(pool);

        tracing::debug!(
            ?pool,
            epoch,
            "command pool reset, its command buffers are stale until begun again",
        );
    }

    /// Records a `vkCmdBindPipeline`.
    pub fn on_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        let Some(bind_point) = BindPoint::from_vk(bind_point) else {
            return;
        };

        self.with_state(command_buffer, |state| {
            state.bind_point_mut(bind_point).pipeline = pipeline;
        });
    }

    /// Records a `vkCmdBindDescriptorSets`, keeping the call itself for replay.
    pub fn on_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        let Some(bind_point) = BindPoint::from_vk(bind_point) else {
            return;
        };

        let call = DescriptorBindCall {
            layout,
            first_set,
            descriptor_set_count: descriptor_sets.len() as u32,
            sets: SmallVec::from_slice(descriptor_sets),
            dynamic_offsets: SmallVec::from_slice(dynamic_offsets),
        };

        self.with_state(command_buffer, |state| {
            state.record_descriptor_bind(bind_point, call);
        });
    }

    /// Records a `vkCmdPushConstants`, appending it to the push constant updates. Payloads longer than
    /// [`MAX_PUSH_CONSTANT_BYTES`](crate::MAX_PUSH_CONSTANT_BYTES) are truncated.
    pub fn on_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        values: &[u8],
    ) {
        let Some(bind_point) = BindPoint::from_vk(bind_point) else {
            return;
        };

        let entry = PushConstantEntry::new(layout, stages, offset, values);

        self.with_state(command_buffer, |state| {
            state.record_push_constants(bind_point, entry);
        });
    }

    /// Records a `vkCmdSetViewport`. Viewports past the tracked capacity are dropped.
    pub fn on_set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    ) {
        self.with_state(command_buffer, |state| {
            state.set_viewports(first_viewport, viewports);
        });
    }

    /// Records a `vkCmdSetScissor`. Scissors past the tracked capacity are dropped.
    pub fn on_set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    ) {
        self.with_state(command_buffer, |state| {
            state.set_scissors(first_scissor, scissors);
        });
    }

    /// Records a `vkCmdBindVertexBuffers`. `buffers` and `offsets` must have the same length.
    pub fn on_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        if buffers.len() != offsets.len() {
            tracing::error!(
                ?command_buffer,
                buffers = buffers.len(),
                offsets = offsets.len(),
                "vertex buffer bind has a different number of buffers and offsets, ignoring it",
            );
            return;
        }

        self.with_state(command_buffer, |state| {
            state.bind_vertex_buffers(first_binding, buffers, offsets);
        });
    }

    /// Records a `vkCmdBindIndexBuffer`.
    pub fn on_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.with_state(command_buffer, |state| {
            state.vertex_input.index_buffer = Some(IndexBufferBinding {
                buffer,
                offset,
                index_type,
            });
        });
    }

    /// Records a `vkCmdPipelineBarrier`: the new layout of every image in `image_barriers`. Memory and buffer barriers
    /// don't affect tracked state.
    pub fn on_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.with_state(command_buffer, |state| {
            state.record_image_barriers(image_barriers);
        });
    }

    /// Records a `vkCmdSetCullMode`.
    pub fn on_set_cull_mode(&self, command_buffer: vk::CommandBuffer, cull_mode: vk::CullModeFlags) {
        self.with_state(command_buffer, |state| {
            state.dynamic.cull_mode = Some(cull_mode);
        });
    }

    /// Records a `vkCmdSetFrontFace`.
    pub fn on_set_front_face(&self, command_buffer: vk::CommandBuffer, front_face: vk::FrontFace) {
        self.with_state(command_buffer, |state| {
            state.dynamic.front_face = Some(front_face);
        });
    }

    /// Records a `vkCmdSetPrimitiveTopology`.
    pub fn on_set_primitive_topology(
        &self,
        command_buffer: vk::CommandBuffer,
        primitive_topology: vk::PrimitiveTopology,
    ) {
        self.with_state(command_buffer, |state| {
            state.dynamic.primitive_topology = Some(primitive_topology);
        });
    }

    /// Records a `vkCmdSetDepthTestEnable`.
    pub fn on_set_depth_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        self.with_state(command_buffer, |state| {
            state.dynamic.depth_test_enable = Some(enable);
        });
    }

    /// Records a `vkCmdSetDepthWriteEnable`.
    pub fn on_set_depth_write_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        self.with_state(command_buffer, |state| {
            state.dynamic.depth_write_enable = Some(enable);
        });
    }

    /// Records a `vkCmdSetDepthCompareOp`.
    pub fn on_set_depth_compare_op(
        &self,
        command_buffer: vk::CommandBuffer,
        compare_op: vk::CompareOp,
    ) {
        self.with_state(command_buffer, |state| {
            state.dynamic.depth_compare_op = Some(compare_op);
        });
    }

    /// Records a `vkCmdSetDepthBoundsTestEnable`.
    pub fn on_set_depth_bounds_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        self.with_state(command_buffer, |state| {
            state.dynamic.depth_bounds_test_enable = Some(enable);
        });
    }

    /// Records a `vkCmdSetStencilTestEnable`.
    pub fn on_set_stencil_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        self.with_state(command_buffer, |state| {
            state.dynamic.stencil_test_enable = Some(enable);
        });
    }

    /// Records a `vkCmdSetStencilOp`.
    pub fn on_set_stencil_op(
        &self,
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        fail_op: vk::StencilOp,
        pass_op: vk::StencilOp,
        depth_fail_op: vk::StencilOp,
        compare_op: vk::CompareOp,
    ) {
        self.with_state(command_buffer, |state| {
            state.dynamic.stencil_op = Some(StencilOpState {
                face_mask,
                fail_op,
                pass_op,
                depth_fail_op,
                compare_op,
            });
        });
    }

    /// Records a `vkCmdBeginRenderPass`.
    pub fn on_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
    ) {
        self.with_state(command_buffer, |state| {
            state.in_render_pass = true;
            state.active_render_pass = render_pass;
            state.active_framebuffer = framebuffer;
        });
    }

    /// Records a `vkCmdEndRenderPass`.
    pub fn on_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.with_state(command_buffer, |state| {
            state.in_render_pass = false;
        });
    }

    /// Drops the state of `command_buffer`. Its pool is still remembered.
    pub fn on_command_buffer_destroyed(&self, command_buffer: vk::CommandBuffer) {
        self.inner.lock().states.remove(&command_buffer);
    }

    /// Records a `vkFreeCommandBuffers`, dropping the state of `command_buffers` and forgetting
    /// their pool.
    pub fn on_free_command_buffers(
        &self,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        {
            let mut inner = self.inner.lock();

            for command_buffer in command_buffers {
                inner.states.remove(command_buffer);
                inner.pools.forget_command_buffer(*command_buffer);
            }
        }

        tracing::debug!(?pool, count = command_buffers.len(), "freed command buffers");
    }

    /// Forgets `pool` and drops the state of every command buffer allocated from it.
    pub fn on_destroy_pool(&self, pool: vk::CommandPool) {
        let count = {
            let mut inner = self.inner.lock();
            let freed = inner.pools.destroy_pool(pool);

            for command_buffer in &freed {
                inner.states.remove(command_buffer);
            }

            freed.len()
        };

        tracing::debug!(?pool, count, "command pool destroyed");
    }

    /// Copies the state of `command_buffer`, if it is still valid.
    pub fn try_get_snapshot(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<CommandBufferSnapshot, SnapshotError> {
        let state = {
            let inner = self.inner.lock();
            let state = inner
                .states
                .get(&command_buffer)
                .ok_or(SnapshotError::UnknownCommandBuffer)
                .and_then(|state| {
                    inner.pools.validate(command_buffer, state.begin_epoch)?;

                    Ok(state.clone())
                });

            state
        };

        let state = match state {
            Ok(state) => state,
            Err(err) => {
                log_refused_snapshot(command_buffer, err);
                return Err(err);
            }
        };

        tracing::trace!(
            ?command_buffer,
            begin_epoch = state.begin_epoch,
            "captured command buffer state",
        );

        Ok(CommandBufferSnapshot {
            command_buffer,
            state,
        })
    }

    /// Snapshots `src` and replays the state selected by `params` into `dst`, with the installed
    /// function table.
    ///
    /// # Safety
    ///
    /// - The safety requirements of [`replay_from_snapshot`] apply.
    pub unsafe fn capture_and_replay(
        &self,
        src: vk::CommandBuffer,
        dst: vk::CommandBuffer,
        params: &ReplayParams,
    ) -> Result<(), ReplayError> {
        let Some(fns) = self.fns.read().clone() else {
            tracing::error!("no function table installed, call `set_function_table` first");
            return Err(ReplayError::MissingFunctionTable);
        };

        unsafe { self.capture_and_replay_with(&*fns, src, dst, params) }
    }

    /// Snapshots `src` and replays the state selected by `params` into `dst`, with `fns`.
    ///
    /// # Safety
    ///
    /// - The safety requirements of [`replay_from_snapshot`] apply.
    pub unsafe fn capture_and_replay_with(
        &self,
        fns: &dyn CommandRecorder,
        src: vk::CommandBuffer,
        dst: vk::CommandBuffer,
        params: &ReplayParams,
    ) -> Result<(), ReplayError> {
        let snapshot = self.try_get_snapshot(src)?;

        unsafe { replay_from_snapshot(fns, &snapshot, dst, params) };

        Ok(())
    }

    /// Like [`capture_and_replay_with`](Self::capture_and_replay_with), but never replays compute
    /// state, whatever `params.replay_compute_too` says.
    ///
    /// # Safety
    ///
    /// - The safety requirements of [`replay_from_snapshot`] apply.
    pub unsafe fn replay_for_graphics_draw(
        &self,
        fns: &dyn CommandRecorder,
        src: vk::CommandBuffer,
        dst: vk::CommandBuffer,
        params: &ReplayParams,
    ) -> Result<(), ReplayError> {
        let params = ReplayParams {
            replay_compute_too: false,
            ..*params
        };

        unsafe { self.capture_and_replay_with(fns, src, dst, &params) }
    }
}

fn log_refused_snapshot(command_buffer: vk::CommandBuffer, err: SnapshotError) {
    match err {
        SnapshotError::UnknownCommandBuffer => {
            tracing::warn!(?command_buffer, "no state tracked for command buffer");
        }
        SnapshotError::UntrackedPool => tracing::warn!(
            ?command_buffer,
            "command buffer was never seen being allocated, refusing to hand out its state",
        ),
        SnapshotError::MissingPoolEpoch => {
            tracing::error!(?command_buffer, "command pool has no epoch");
        }
        SnapshotError::Stale {
            begin_epoch,
            pool_epoch,
        } => tracing::warn!(
            ?command_buffer,
            begin_epoch,
            pool_epoch,
            "command buffer state is stale, its pool was reset after it was begun",
        ),
    }
}

impl Default for ShadowTracker {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShadowTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowTracker")
            .field("tracked_count", &self.tracked_count())
            .field("has_function_table", &self.has_function_table())
            .finish_non_exhaustive()
    }
}

/// A copy of the state of a command buffer, taken with [`ShadowTracker::try_get_snapshot`].
#[derive(Clone, Debug)]
pub struct CommandBufferSnapshot {
    command_buffer: vk::CommandBuffer,
    state: CommandBufferState,
}

impl CommandBufferSnapshot {
    /// Returns the command buffer the state was copied from.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn into_state(self) -> CommandBufferState {
        self.state
    }
}

impl Deref for CommandBufferSnapshot {
    type Target = CommandBufferState;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.state
    }
}
