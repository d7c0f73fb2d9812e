// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Adapters taking the arguments of the native entry points as they are.
//!
//! A count paired with a null pointer is rejected here, before anything is locked, and the call
//! is dropped. A count of zero is accepted whatever the pointer.

use crate::ShadowTracker;
use ash::vk;
use std::{ffi::c_void, slice};

/// Turns a native pointer/count pair into a slice, or returns `None` if the pointer is null but
/// the count isn't zero.
///
/// # Safety
///
/// - If `count` is not zero and `ptr` is not null, `ptr` must point to `count` valid elements that
///   outlive `'a`.
unsafe fn native_slice<'a, T>(ptr: *const T, count: u32) -> Option<&'a [T]> {
    if count == 0 {
        Some(Default::default())
    } else if ptr.is_null() {
        None
    } else {
        Some(unsafe { slice::from_raw_parts(ptr, count as usize) })
    }
}

impl ShadowTracker {
    /// Raw form of [`on_allocate_command_buffers`](Self::on_allocate_command_buffers).
    ///
    /// # Safety
    ///
    /// - `p_command_buffers` must be null or point to `count` command buffers.
    pub unsafe fn on_allocate_command_buffers_raw(
        &self,
        pool: vk::CommandPool,
        count: u32,
        p_command_buffers: *const vk::CommandBuffer,
    ) {
        let Some(command_buffers) = (unsafe { native_slice(p_command_buffers, count) }) else {
            tracing::error!(?pool, count, "vkAllocateCommandBuffers with null command buffers");
            return;
        };

        self.on_allocate_command_buffers(pool, command_buffers);
    }

    /// Raw form of [`on_begin`](Self::on_begin). A null begin info begins with empty flags.
    ///
    /// # Safety
    ///
    /// - `p_begin_info` must be null or point to a valid begin info.
    pub unsafe fn on_begin_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        p_begin_info: *const vk::CommandBufferBeginInfo<'_>,
    ) {
        let flags = unsafe { p_begin_info.as_ref() }
            .map(|begin_info| begin_info.flags)
            .unwrap_or_default();

        self.on_begin(command_buffer, flags);
    }

    /// Raw form of [`on_bind_descriptor_sets`](Self::on_bind_descriptor_sets).
    ///
    /// # Safety
    ///
    /// - `p_descriptor_sets` must be null or point to `descriptor_set_count` descriptor sets.
    /// - `p_dynamic_offsets` must be null or point to `dynamic_offset_count` offsets.
    pub unsafe fn on_bind_descriptor_sets_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_set_count: u32,
        p_descriptor_sets: *const vk::DescriptorSet,
        dynamic_offset_count: u32,
        p_dynamic_offsets: *const u32,
    ) {
        let Some(descriptor_sets) = (unsafe { native_slice(p_descriptor_sets, descriptor_set_count) })
        else {
            tracing::error!(
                ?command_buffer,
                descriptor_set_count,
                "vkCmdBindDescriptorSets with null descriptor sets, ignoring it",
            );
            return;
        };

        let Some(dynamic_offsets) =
            (unsafe { native_slice(p_dynamic_offsets, dynamic_offset_count) })
        else {
            tracing::error!(
                ?command_buffer,
                dynamic_offset_count,
                "vkCmdBindDescriptorSets with null dynamic offsets, ignoring it",
            );
            return;
        };

        self.on_bind_descriptor_sets(
            command_buffer,
            bind_point,
            layout,
            first_set,
            descriptor_sets,
            dynamic_offsets,
        );
    }

    /// Raw form of [`on_push_constants`](Self::on_push_constants).
    ///
    /// # Safety
    ///
    /// - `p_values` must be null or point to `size` bytes.
    pub unsafe fn on_push_constants_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        size: u32,
        p_values: *const c_void,
    ) {
        let Some(values) = (unsafe { native_slice(p_values.cast::<u8>(), size) }) else {
            tracing::error!(
                ?command_buffer,
                size,
                "vkCmdPushConstants with null values, ignoring it",
            );
            return;
        };

        self.on_push_constants(command_buffer, bind_point, layout, stages, offset, values);
    }

    /// Raw form of [`on_set_viewport`](Self::on_set_viewport).
    ///
    /// # Safety
    ///
    /// - `p_viewports` must be null or point to `viewport_count` viewports.
    pub unsafe fn on_set_viewport_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewport_count: u32,
        p_viewports: *const vk::Viewport,
    ) {
        let Some(viewports) = (unsafe { native_slice(p_viewports, viewport_count) }) else {
            tracing::error!(
                ?command_buffer,
                viewport_count,
                "vkCmdSetViewport with null viewports, ignoring it",
            );
            return;
        };

        self.on_set_viewport(command_buffer, first_viewport, viewports);
    }

    /// Raw form of [`on_set_scissor`](Self::on_set_scissor).
    ///
    /// # Safety
    ///
    /// - `p_scissors` must be null or point to `scissor_count` scissors.
    pub unsafe fn on_set_scissor_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissor_count: u32,
        p_scissors: *const vk::Rect2D,
    ) {
        let Some(scissors) = (unsafe { native_slice(p_scissors, scissor_count) }) else {
            tracing::error!(
                ?command_buffer,
                scissor_count,
                "vkCmdSetScissor with null scissors, ignoring it",
            );
            return;
        };

        self.on_set_scissor(command_buffer, first_scissor, scissors);
    }

    /// Raw form of [`on_bind_vertex_buffers`](Self::on_bind_vertex_buffers).
    ///
    /// # Safety
    ///
    /// - `p_buffers` and `p_offsets` must each be null or point to `binding_count` elements.
    pub unsafe fn on_bind_vertex_buffers_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        binding_count: u32,
        p_buffers: *const vk::Buffer,
        p_offsets: *const vk::DeviceSize,
    ) {
        let buffers = unsafe { native_slice(p_buffers, binding_count) };
        let offsets = unsafe { native_slice(p_offsets, binding_count) };

        let (Some(buffers), Some(offsets)) = (buffers, offsets) else {
            tracing::error!(
                ?command_buffer,
                binding_count,
                buffers_null = p_buffers.is_null(),
                offsets_null = p_offsets.is_null(),
                "vkCmdBindVertexBuffers with null buffers or offsets, ignoring it",
            );
            return;
        };

        self.on_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets);
    }

    /// Raw form of [`on_pipeline_barrier`](Self::on_pipeline_barrier). The stage masks, dependency
    /// flags, memory barriers and buffer barriers are only checked, not tracked.
    ///
    /// # Safety
    ///
    /// - Each barrier pointer must be null or point to as many barriers as its count says.
    pub unsafe fn on_pipeline_barrier_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        _src_stage_mask: vk::PipelineStageFlags,
        _dst_stage_mask: vk::PipelineStageFlags,
        _dependency_flags: vk::DependencyFlags,
        memory_barrier_count: u32,
        p_memory_barriers: *const vk::MemoryBarrier<'_>,
        buffer_memory_barrier_count: u32,
        p_buffer_memory_barriers: *const vk::BufferMemoryBarrier<'_>,
        image_memory_barrier_count: u32,
        p_image_memory_barriers: *const vk::ImageMemoryBarrier<'_>,
    ) {
        if (memory_barrier_count != 0 && p_memory_barriers.is_null())
            || (buffer_memory_barrier_count != 0 && p_buffer_memory_barriers.is_null())
        {
            tracing::error!(
                ?command_buffer,
                memory_barrier_count,
                buffer_memory_barrier_count,
                "vkCmdPipelineBarrier with null barriers, ignoring it",
            );
            return;
        }

        let Some(image_barriers) =
            (unsafe { native_slice(p_image_memory_barriers, image_memory_barrier_count) })
        else {
            tracing::error!(
                ?command_buffer,
                image_memory_barrier_count,
                "vkCmdPipelineBarrier with null image barriers, ignoring it",
            );
            return;
        };

        self.on_pipeline_barrier(command_buffer, image_barriers);
    }

    /// Raw form of [`on_begin_render_pass`](Self::on_begin_render_pass). A null begin info marks
    /// the render pass as active with null render pass and framebuffer handles.
    ///
    /// # Safety
    ///
    /// - `p_render_pass_begin` must be null or point to a valid begin info.
    pub unsafe fn on_begin_render_pass_raw(
        &self,
        command_buffer: vk::CommandBuffer,
        p_render_pass_begin: *const vk::RenderPassBeginInfo<'_>,
    ) {
        let (render_pass, framebuffer) = unsafe { p_render_pass_begin.as_ref() }
            .map(|begin| (begin.render_pass, begin.framebuffer))
            .unwrap_or_default();

        self.on_begin_render_pass(command_buffer, render_pass, framebuffer);
    }

    /// Raw form of [`on_free_command_buffers`](Self::on_free_command_buffers).
    ///
    /// # Safety
    ///
    /// - `p_command_buffers` must be null or point to `count` command buffers.
    pub unsafe fn on_free_command_buffers_raw(
        &self,
        pool: vk::CommandPool,
        count: u32,
        p_command_buffers: *const vk::CommandBuffer,
    ) {
        let Some(command_buffers) = (unsafe { native_slice(p_command_buffers, count) }) else {
            tracing::error!(?pool, count, "vkFreeCommandBuffers with null command buffers");
            return;
        };

        self.on_free_command_buffers(pool, command_buffers);
    }
}

#[cfg(test)]
mod tests {
    use crate::{BindPoint, ShadowTracker};
    use ash::vk;
    use std::ptr;

    fn begun() -> (ShadowTracker, vk::CommandBuffer) {
        let tracker = ShadowTracker::new();
        let cmd = handle!(CommandBuffer, 10);
        let cmds = [cmd];

        unsafe {
            tracker.on_allocate_command_buffers_raw(handle!(CommandPool, 1), 1, cmds.as_ptr());
            tracker.on_begin_raw(cmd, ptr::null());
        }

        (tracker, cmd)
    }

    #[test]
    fn null_begin_info() {
        let (tracker, cmd) = begun();
        let snapshot = tracker.try_get_snapshot(cmd).unwrap();

        assert!(snapshot.recording);
        assert_eq!(snapshot.begin_flags, vk::CommandBufferUsageFlags::empty());

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE);
        unsafe { tracker.on_begin_raw(cmd, &begin_info) };
        assert_eq!(
            tracker.try_get_snapshot(cmd).unwrap().begin_flags,
            vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE,
        );
    }

    #[test]
    fn null_dynamic_offsets_are_rejected() {
        let (tracker, cmd) = begun();
        let sets = [
            handle!(DescriptorSet, 1),
            handle!(DescriptorSet, 2),
            handle!(DescriptorSet, 3),
        ];

        unsafe {
            tracker.on_bind_descriptor_sets_raw(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                handle!(PipelineLayout, 1),
                0,
                3,
                sets.as_ptr(),
                2,
                ptr::null(),
            )
        };

        let snapshot = tracker.try_get_snapshot(cmd).unwrap();
        let graphics = snapshot.bind_point(BindPoint::Graphics);
        assert!(graphics.bound_set(1).is_none());
        assert!(graphics.bind_calls.is_empty());
        assert_eq!(graphics.current_layout, vk::PipelineLayout::null());
    }

    #[test]
    fn zero_counts_ignore_pointers() {
        let (tracker, cmd) = begun();

        unsafe {
            tracker.on_bind_descriptor_sets_raw(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                handle!(PipelineLayout, 1),
                0,
                0,
                ptr::null(),
                0,
                ptr::null(),
            );
            tracker.on_push_constants_raw(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                handle!(PipelineLayout, 1),
                vk::ShaderStageFlags::VERTEX,
                0,
                0,
                ptr::null(),
            );
            tracker.on_set_viewport_raw(cmd, 0, 0, ptr::null());
        }

        let snapshot = tracker.try_get_snapshot(cmd).unwrap();
        assert_eq!(snapshot.bind_point(BindPoint::Compute).bind_calls.len(), 1);
        assert_eq!(snapshot.push_constants.len(), 1);
        assert_eq!(snapshot.push_constants[0].size(), 0);
        assert!(snapshot.dynamic.viewports.is_empty());
    }

    #[test]
    fn null_pointers_with_counts_are_rejected() {
        let (tracker, cmd) = begun();
        let buffers = [handle!(Buffer, 1)];

        unsafe {
            tracker.on_push_constants_raw(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                handle!(PipelineLayout, 1),
                vk::ShaderStageFlags::VERTEX,
                0,
                16,
                ptr::null(),
            );
            tracker.on_set_viewport_raw(cmd, 0, 1, ptr::null());
            tracker.on_set_scissor_raw(cmd, 0, 1, ptr::null());
            tracker.on_bind_vertex_buffers_raw(cmd, 0, 1, buffers.as_ptr(), ptr::null());
            tracker.on_pipeline_barrier_raw(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                0,
                ptr::null(),
                0,
                ptr::null(),
                1,
                ptr::null(),
            );
        }

        let snapshot = tracker.try_get_snapshot(cmd).unwrap();
        assert!(snapshot.push_constants.is_empty());
        assert_eq!(
            snapshot.bind_point(BindPoint::Graphics).current_layout,
            vk::PipelineLayout::null(),
        );
        assert!(snapshot.dynamic.viewports.is_empty());
        assert!(snapshot.dynamic.scissors.is_empty());
        assert!(snapshot.vertex_input.buffers.is_empty());
        assert!(snapshot.image_layouts.is_empty());
    }

    #[test]
    fn raw_arrays_are_forwarded() {
        let (tracker, cmd) = begun();
        let scissors = [vk::Rect2D::default(); 2];
        let barriers = [vk::ImageMemoryBarrier::default()
            .image(handle!(Image, 4))
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)];
        let values = [7u8; 12];

        unsafe {
            tracker.on_set_scissor_raw(cmd, 3, 2, scissors.as_ptr());
            tracker.on_pipeline_barrier_raw(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                0,
                ptr::null(),
                0,
                ptr::null(),
                1,
                barriers.as_ptr(),
            );
            tracker.on_push_constants_raw(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                handle!(PipelineLayout, 1),
                vk::ShaderStageFlags::FRAGMENT,
                4,
                values.len() as u32,
                values.as_ptr().cast(),
            );
        }

        let snapshot = tracker.try_get_snapshot(cmd).unwrap();
        assert_eq!(snapshot.dynamic.scissors.valid_mask(), 0b11000);
        assert_eq!(
            snapshot.image_layout(handle!(Image, 4)),
            Some(vk::ImageLayout::PRESENT_SRC_KHR),
        );
        assert_eq!(snapshot.push_constants[0].data(), values.as_slice());
    }

    #[test]
    fn render_pass_and_free() {
        let (tracker, cmd) = begun();

        unsafe { tracker.on_begin_render_pass_raw(cmd, ptr::null()) };
        let snapshot = tracker.try_get_snapshot(cmd).unwrap();
        assert!(snapshot.in_render_pass);
        assert_eq!(snapshot.active_render_pass, vk::RenderPass::null());
        assert_eq!(snapshot.active_framebuffer, vk::Framebuffer::null());

        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(handle!(RenderPass, 5))
            .framebuffer(handle!(Framebuffer, 6));
        unsafe { tracker.on_begin_render_pass_raw(cmd, &begin) };
        assert_eq!(
            tracker.try_get_snapshot(cmd).unwrap().active_render_pass,
            handle!(RenderPass, 5),
        );

        unsafe { tracker.on_free_command_buffers_raw(handle!(CommandPool, 1), 1, ptr::null()) };
        assert!(tracker.is_tracked(cmd));

        let cmds = [cmd];
        unsafe { tracker.on_free_command_buffers_raw(handle!(CommandPool, 1), 1, cmds.as_ptr()) };
        assert!(!tracker.is_tracked(cmd));
    }
}
