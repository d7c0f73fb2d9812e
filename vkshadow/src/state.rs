// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The shadow state kept for a single command buffer.
//!
//! Everything here is plain data. The tracker owns one [`CommandBufferState`] per command buffer
//! and mutates it under its lock; a snapshot is a clone of it.

use crate::{
    slots::SlotArray, BindPoint, MAX_DESCRIPTOR_SETS, MAX_PUSH_CONSTANT_BYTES, MAX_SCISSORS,
    MAX_VERTEX_BUFFERS, MAX_VIEWPORTS,
};
use ash::vk;
use foldhash::HashMap;
use smallvec::SmallVec;
use std::{fmt, mem::take, ops::Range};

/// The state of one descriptor set slot of a bind point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub bound: bool,
    pub set: vk::DescriptorSet,
    /// The pipeline layout given to the call that bound the set.
    pub bound_with_layout: vk::PipelineLayout,
    /// Index into [`BindPointState::bind_calls`] of the call that bound the set.
    pub bind_call_index: u32,
}

/// A descriptor set bind call, exactly as the application issued it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorBindCall {
    pub layout: vk::PipelineLayout,
    pub first_set: u32,
    pub descriptor_set_count: u32,
    pub sets: SmallVec<[vk::DescriptorSet; 4]>,
    pub dynamic_offsets: SmallVec<[u32; 4]>,
}

impl DescriptorBindCall {
    /// Returns the range of set indices this call binds, or `None` if it overflows.
    #[inline]
    pub fn set_range(&self) -> Option<Range<u32>> {
        let end = self.first_set.checked_add(self.descriptor_set_count)?;

        Some(self.first_set..end)
    }
}

/// A push constant update. The payload is copied, up to [`MAX_PUSH_CONSTANT_BYTES`].
#[derive(Clone, Copy)]
pub struct PushConstantEntry {
    layout: vk::PipelineLayout,
    stages: vk::ShaderStageFlags,
    offset: u32,
    size: u32,
    data: [u8; MAX_PUSH_CONSTANT_BYTES as usize],
}

impl PushConstantEntry {
    /// Copies `values` into a new entry. A payload longer than [`MAX_PUSH_CONSTANT_BYTES`] is
    /// truncated.
    pub fn new(
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        values: &[u8],
    ) -> Self {
        let mut entry = PushConstantEntry {
            layout,
            stages,
            offset,
            ..Default::default()
        };

        let len = if values.len() > MAX_PUSH_CONSTANT_BYTES as usize {
            tracing::warn!(
                size = values.len(),
                max = MAX_PUSH_CONSTANT_BYTES,
                "push constant payload is too large, truncating it",
            );

            MAX_PUSH_CONSTANT_BYTES as usize
        } else {
            values.len()
        };

        entry.data[..len].copy_from_slice(&values[..len]);
        entry.size = len as u32;

        entry
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    #[inline]
    pub fn stages(&self) -> vk::ShaderStageFlags {
        self.stages
    }

    #[inline]
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Returns the number of stored bytes, after truncation.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the stored payload.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }
}

impl Default for PushConstantEntry {
    #[inline]
    fn default() -> Self {
        PushConstantEntry {
            layout: vk::PipelineLayout::null(),
            stages: vk::ShaderStageFlags::empty(),
            offset: 0,
            size: 0,
            data: [0; MAX_PUSH_CONSTANT_BYTES as usize],
        }
    }
}

impl fmt::Debug for PushConstantEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushConstantEntry")
            .field("layout", &self.layout)
            .field("stages", &self.stages)
            .field("offset", &self.offset)
            .field("data", &self.data())
            .finish()
    }
}

/// The bindings of one pipeline bind point.
#[derive(Clone, Debug, Default)]
pub struct BindPointState {
    pub pipeline: vk::Pipeline,
    /// The layout last given to a descriptor set bind or push constant call on this bind point.
    pub current_layout: vk::PipelineLayout,
    pub sets: [DescriptorBinding; MAX_DESCRIPTOR_SETS as usize],
    /// Every descriptor set bind call, in recording order.
    pub bind_calls: Vec<DescriptorBindCall>,
}

impl BindPointState {
    /// Returns the slot `index`, if it is bound to a non-null set.
    #[inline]
    pub fn bound_set(&self, index: u32) -> Option<&DescriptorBinding> {
        self.sets
            .get(index as usize)
            .filter(|binding| binding.bound && binding.set != vk::DescriptorSet::null())
    }

    fn record_bind_call(&mut self, call: DescriptorBindCall) {
        self.current_layout = call.layout;

        let bind_call_index = self.bind_calls.len() as u32;

        for (i, &set) in call.sets.iter().enumerate() {
            let Some(slot) = call.first_set.checked_add(i as u32) else {
                break;
            };

            if let Some(binding) = self.sets.get_mut(slot as usize) {
                *binding = DescriptorBinding {
                    bound: true,
                    set,
                    bound_with_layout: call.layout,
                    bind_call_index,
                };
            }
        }

        self.bind_calls.push(call);
    }
}

/// The stencil operations last set with `vkCmdSetStencilOp`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StencilOpState {
    pub face_mask: vk::StencilFaceFlags,
    pub fail_op: vk::StencilOp,
    pub pass_op: vk::StencilOp,
    pub depth_fail_op: vk::StencilOp,
    pub compare_op: vk::CompareOp,
}

/// Dynamic pipeline state. A `None` value has not been set since the command buffer was begun.
#[derive(Clone, Debug, Default)]
pub struct DynamicState {
    pub viewports: SlotArray<vk::Viewport, { MAX_VIEWPORTS as usize }>,
    pub scissors: SlotArray<vk::Rect2D, { MAX_SCISSORS as usize }>,
    pub cull_mode: Option<vk::CullModeFlags>,
    pub front_face: Option<vk::FrontFace>,
    pub primitive_topology: Option<vk::PrimitiveTopology>,
    pub depth_test_enable: Option<bool>,
    pub depth_write_enable: Option<bool>,
    pub depth_compare_op: Option<vk::CompareOp>,
    pub depth_bounds_test_enable: Option<bool>,
    pub stencil_test_enable: Option<bool>,
    pub stencil_op: Option<StencilOpState>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexBufferBinding {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexBufferBinding {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    pub index_type: vk::IndexType,
}

/// Vertex and index buffer bindings.
#[derive(Clone, Debug, Default)]
pub struct VertexInputState {
    pub buffers: SlotArray<VertexBufferBinding, { MAX_VERTEX_BUFFERS as usize }>,
    pub index_buffer: Option<IndexBufferBinding>,
}

/// Everything known about the state of one command buffer.
#[derive(Clone, Debug, Default)]
pub struct CommandBufferState {
    /// Between begin and end.
    pub recording: bool,
    /// Begun at least once since the state was created or last reset.
    pub has_begun: bool,
    pub begin_flags: vk::CommandBufferUsageFlags,
    /// The epoch of the owning pool when the command buffer was last begun.
    pub begin_epoch: u64,
    /// The layout each image was last transitioned to by a barrier.
    pub image_layouts: HashMap<vk::Image, vk::ImageLayout>,
    pub in_render_pass: bool,
    pub active_render_pass: vk::RenderPass,
    pub active_framebuffer: vk::Framebuffer,
    pub bind_points: [BindPointState; BindPoint::COUNT],
    pub dynamic: DynamicState,
    pub vertex_input: VertexInputState,
    /// Every push constant update, in recording order.
    pub push_constants: Vec<PushConstantEntry>,
}

impl CommandBufferState {
    pub(crate) fn new() -> Self {
        CommandBufferState {
            push_constants: Vec::with_capacity(8),
            ..Default::default()
        }
    }

    /// Returns every field to its default, keeping the allocations of the collections.
    pub(crate) fn reset(&mut self) {
        let mut image_layouts = take(&mut self.image_layouts);
        image_layouts.clear();
        let mut push_constants = take(&mut self.push_constants);
        push_constants.clear();
        let mut bind_points = take(&mut self.bind_points);

        for bind_point in &mut bind_points {
            let mut bind_calls = take(&mut bind_point.bind_calls);
            bind_calls.clear();
            *bind_point = BindPointState {
                bind_calls,
                ..Default::default()
            };
        }

        *self = CommandBufferState {
            image_layouts,
            bind_points,
            push_constants,
            ..Default::default()
        };
    }

    /// Returns the bindings of `bind_point`.
    #[inline]
    pub fn bind_point(&self, bind_point: BindPoint) -> &BindPointState {
        &self.bind_points[bind_point.index()]
    }

    #[inline]
    pub(crate) fn bind_point_mut(&mut self, bind_point: BindPoint) -> &mut BindPointState {
        &mut self.bind_points[bind_point.index()]
    }

    /// Returns the layout `image` was last transitioned to, if any barrier touched it.
    #[inline]
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.image_layouts.get(&image).copied()
    }

    pub(crate) fn begin(&mut self, flags: vk::CommandBufferUsageFlags, epoch: u64) {
        self.reset();
        self.recording = true;
        self.has_begun = true;
        self.begin_flags = flags;
        self.begin_epoch = epoch;
    }

    pub(crate) fn record_descriptor_bind(
        &mut self,
        bind_point: BindPoint,
        call: DescriptorBindCall,
    ) {
        self.bind_point_mut(bind_point).record_bind_call(call);
    }

    pub(crate) fn record_push_constants(&mut self, bind_point: BindPoint, entry: PushConstantEntry) {
        self.bind_point_mut(bind_point).current_layout = entry.layout;
        self.push_constants.push(entry);
    }

    pub(crate) fn set_viewports(&mut self, first: u32, viewports: &[vk::Viewport]) {
        self.dynamic.viewports.write(first, viewports.iter().copied());
    }

    pub(crate) fn set_scissors(&mut self, first: u32, scissors: &[vk::Rect2D]) {
        self.dynamic.scissors.write(first, scissors.iter().copied());
    }

    pub(crate) fn bind_vertex_buffers(
        &mut self,
        first: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        self.vertex_input.buffers.write(
            first,
            buffers
                .iter()
                .zip(offsets)
                .map(|(&buffer, &offset)| VertexBufferBinding { buffer, offset }),
        );
    }

    pub(crate) fn record_image_barriers(&mut self, barriers: &[vk::ImageMemoryBarrier<'_>]) {
        self.image_layouts.extend(
            barriers
                .iter()
                .map(|barrier| (barrier.image, barrier.new_layout)),
        );
    }
}
