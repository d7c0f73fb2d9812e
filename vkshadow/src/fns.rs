// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The commands that replay records into the destination command buffer.
//!
//! Replay never calls Vulkan directly. It goes through a [`CommandRecorder`], which is normally a
//! [`VulkanCmdFns`] holding the real entry points. A layer that hooks those entry points must
//! load the *unhooked* ones, otherwise replayed commands are tracked again as if the application
//! had recorded them.

use ash::vk;
use std::{
    ffi::{c_void, CStr},
    mem, ptr,
};

/// Records commands into a command buffer.
///
/// # Safety
///
/// All methods have the same safety requirements as the Vulkan command they stand for:
/// `command_buffer` must be in the recording state, every handle must be valid and the
/// parameters must satisfy the valid usage of the command.
pub trait CommandRecorder: Send + Sync {
    unsafe fn bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    unsafe fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );

    unsafe fn push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        values: &[u8],
    );

    unsafe fn set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    );

    unsafe fn set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    );

    unsafe fn bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );

    unsafe fn bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    unsafe fn set_cull_mode(&self, command_buffer: vk::CommandBuffer, cull_mode: vk::CullModeFlags);

    unsafe fn set_front_face(&self, command_buffer: vk::CommandBuffer, front_face: vk::FrontFace);

    unsafe fn set_primitive_topology(
        &self,
        command_buffer: vk::CommandBuffer,
        primitive_topology: vk::PrimitiveTopology,
    );

    unsafe fn set_depth_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool);

    unsafe fn set_depth_write_enable(&self, command_buffer: vk::CommandBuffer, enable: bool);

    unsafe fn set_depth_compare_op(
        &self,
        command_buffer: vk::CommandBuffer,
        compare_op: vk::CompareOp,
    );

    unsafe fn set_depth_bounds_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool);

    unsafe fn set_stencil_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool);

    unsafe fn set_stencil_op(
        &self,
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        fail_op: vk::StencilOp,
        pass_op: vk::StencilOp,
        depth_fail_op: vk::StencilOp,
        compare_op: vk::CompareOp,
    );
}

/// Raw Vulkan command entry points.
///
/// Every entry point is optional. Commands whose entry point is missing are silently skipped
/// during replay, which is what happens for the extended dynamic state commands on a device
/// without Vulkan 1.3 or `VK_EXT_extended_dynamic_state`.
#[derive(Clone, Copy, Debug, Default)]
pub struct VulkanCmdFns {
    pub cmd_bind_pipeline: Option<vk::PFN_vkCmdBindPipeline>,
    pub cmd_bind_descriptor_sets: Option<vk::PFN_vkCmdBindDescriptorSets>,
    pub cmd_push_constants: Option<vk::PFN_vkCmdPushConstants>,
    pub cmd_set_viewport: Option<vk::PFN_vkCmdSetViewport>,
    pub cmd_set_scissor: Option<vk::PFN_vkCmdSetScissor>,
    pub cmd_bind_vertex_buffers: Option<vk::PFN_vkCmdBindVertexBuffers>,
    pub cmd_bind_index_buffer: Option<vk::PFN_vkCmdBindIndexBuffer>,
    pub cmd_set_cull_mode: Option<vk::PFN_vkCmdSetCullMode>,
    pub cmd_set_front_face: Option<vk::PFN_vkCmdSetFrontFace>,
    pub cmd_set_primitive_topology: Option<vk::PFN_vkCmdSetPrimitiveTopology>,
    pub cmd_set_depth_test_enable: Option<vk::PFN_vkCmdSetDepthTestEnable>,
    pub cmd_set_depth_write_enable: Option<vk::PFN_vkCmdSetDepthWriteEnable>,
    pub cmd_set_depth_compare_op: Option<vk::PFN_vkCmdSetDepthCompareOp>,
    pub cmd_set_depth_bounds_test_enable: Option<vk::PFN_vkCmdSetDepthBoundsTestEnable>,
    pub cmd_set_stencil_test_enable: Option<vk::PFN_vkCmdSetStencilTestEnable>,
    pub cmd_set_stencil_op: Option<vk::PFN_vkCmdSetStencilOp>,
}

// Tries each name in turn, so that a core entry point can fall back to its extension alias.
macro_rules! load_fn {
    ($load_fn:ident, $ty:ty, $($name:literal),+ $(,)?) => {{
        let mut fn_ptr: *const c_void = ptr::null();
        $(
            if fn_ptr.is_null() {
                fn_ptr = $load_fn($name);
            }
        )+

        if fn_ptr.is_null() {
            None
        } else {
            Some(unsafe { mem::transmute::<*const c_void, $ty>(fn_ptr) })
        }
    }};
}

impl VulkanCmdFns {
    /// Loads the entry points with `load_fn`, which is given a command name and returns its
    /// address or null.
    ///
    /// # Safety
    ///
    /// - Every non-null pointer returned by `load_fn` must be the entry point of the named
    ///   command, and must stay valid for as long as the returned table is used.
    pub unsafe fn load<F>(mut load_fn: F) -> Self
    where
        F: FnMut(&CStr) -> *const c_void,
    {
        VulkanCmdFns {
            cmd_bind_pipeline: load_fn!(load_fn, vk::PFN_vkCmdBindPipeline, c"vkCmdBindPipeline"),
            cmd_bind_descriptor_sets: load_fn!(
                load_fn,
                vk::PFN_vkCmdBindDescriptorSets,
                c"vkCmdBindDescriptorSets",
            ),
            cmd_push_constants: load_fn!(
                load_fn,
                vk::PFN_vkCmdPushConstants,
                c"vkCmdPushConstants",
            ),
            cmd_set_viewport: load_fn!(load_fn, vk::PFN_vkCmdSetViewport, c"vkCmdSetViewport"),
            cmd_set_scissor: load_fn!(load_fn, vk::PFN_vkCmdSetScissor, c"vkCmdSetScissor"),
            cmd_bind_vertex_buffers: load_fn!(
                load_fn,
                vk::PFN_vkCmdBindVertexBuffers,
                c"vkCmdBindVertexBuffers",
            ),
            cmd_bind_index_buffer: load_fn!(
                load_fn,
                vk::PFN_vkCmdBindIndexBuffer,
                c"vkCmdBindIndexBuffer",
            ),
            cmd_set_cull_mode: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetCullMode,
                c"vkCmdSetCullMode",
                c"vkCmdSetCullModeEXT",
            ),
            cmd_set_front_face: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetFrontFace,
                c"vkCmdSetFrontFace",
                c"vkCmdSetFrontFaceEXT",
            ),
            cmd_set_primitive_topology: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetPrimitiveTopology,
                c"vkCmdSetPrimitiveTopology",
                c"vkCmdSetPrimitiveTopologyEXT",
            ),
            cmd_set_depth_test_enable: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetDepthTestEnable,
                c"vkCmdSetDepthTestEnable",
                c"vkCmdSetDepthTestEnableEXT",
            ),
            cmd_set_depth_write_enable: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetDepthWriteEnable,
                c"vkCmdSetDepthWriteEnable",
                c"vkCmdSetDepthWriteEnableEXT",
            ),
            cmd_set_depth_compare_op: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetDepthCompareOp,
                c"vkCmdSetDepthCompareOp",
                c"vkCmdSetDepthCompareOpEXT",
            ),
            cmd_set_depth_bounds_test_enable: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetDepthBoundsTestEnable,
                c"vkCmdSetDepthBoundsTestEnable",
                c"vkCmdSetDepthBoundsTestEnableEXT",
            ),
            cmd_set_stencil_test_enable: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetStencilTestEnable,
                c"vkCmdSetStencilTestEnable",
                c"vkCmdSetStencilTestEnableEXT",
            ),
            cmd_set_stencil_op: load_fn!(
                load_fn,
                vk::PFN_vkCmdSetStencilOp,
                c"vkCmdSetStencilOp",
                c"vkCmdSetStencilOpEXT",
            ),
        }
    }

    /// Loads the entry points of `device` through `vkGetDeviceProcAddr`.
    ///
    /// Don't use this from inside a layer that hooks these commands: it returns the hooked entry
    /// points. Load the next layer's entry points with [`load`](Self::load) instead.
    ///
    /// # Safety
    ///
    /// - `device` must be a valid device created from `instance`.
    pub unsafe fn from_device(instance: &ash::Instance, device: vk::Device) -> Self {
        let get_device_proc_addr = instance.fp_v1_0().get_device_proc_addr;

        unsafe {
            Self::load(|name| {
                mem::transmute::<vk::PFN_vkVoidFunction, *const c_void>(get_device_proc_addr(
                    device,
                    name.as_ptr(),
                ))
            })
        }
    }
}

impl CommandRecorder for VulkanCmdFns {
    unsafe fn bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        if let Some(cmd_bind_pipeline) = self.cmd_bind_pipeline {
            unsafe { cmd_bind_pipeline(command_buffer, bind_point, pipeline) };
        }
    }

    unsafe fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        if let Some(cmd_bind_descriptor_sets) = self.cmd_bind_descriptor_sets {
            unsafe {
                cmd_bind_descriptor_sets(
                    command_buffer,
                    bind_point,
                    layout,
                    first_set,
                    descriptor_sets.len() as u32,
                    descriptor_sets.as_ptr(),
                    dynamic_offsets.len() as u32,
                    dynamic_offsets.as_ptr(),
                )
            };
        }
    }

    unsafe fn push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        values: &[u8],
    ) {
        if let Some(cmd_push_constants) = self.cmd_push_constants {
            unsafe {
                cmd_push_constants(
                    command_buffer,
                    layout,
                    stages,
                    offset,
                    values.len() as u32,
                    values.as_ptr().cast(),
                )
            };
        }
    }

    unsafe fn set_viewport(
        &self,
        command_buffer: vk::CommandBuffer,
        first_viewport: u32,
        viewports: &[vk::Viewport],
    ) {
        if let Some(cmd_set_viewport) = self.cmd_set_viewport {
            unsafe {
                cmd_set_viewport(
                    command_buffer,
                    first_viewport,
                    viewports.len() as u32,
                    viewports.as_ptr(),
                )
            };
        }
    }

    unsafe fn set_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        first_scissor: u32,
        scissors: &[vk::Rect2D],
    ) {
        if let Some(cmd_set_scissor) = self.cmd_set_scissor {
            unsafe {
                cmd_set_scissor(
                    command_buffer,
                    first_scissor,
                    scissors.len() as u32,
                    scissors.as_ptr(),
                )
            };
        }
    }

    unsafe fn bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        debug_assert_eq!(buffers.len(), offsets.len());

        if let Some(cmd_bind_vertex_buffers) = self.cmd_bind_vertex_buffers {
            unsafe {
                cmd_bind_vertex_buffers(
                    command_buffer,
                    first_binding,
                    buffers.len() as u32,
                    buffers.as_ptr(),
                    offsets.as_ptr(),
                )
            };
        }
    }

    unsafe fn bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        if let Some(cmd_bind_index_buffer) = self.cmd_bind_index_buffer {
            unsafe { cmd_bind_index_buffer(command_buffer, buffer, offset, index_type) };
        }
    }

    unsafe fn set_cull_mode(&self, command_buffer: vk::CommandBuffer, cull_mode: vk::CullModeFlags) {
        if let Some(cmd_set_cull_mode) = self.cmd_set_cull_mode {
            unsafe { cmd_set_cull_mode(command_buffer, cull_mode) };
        }
    }

    unsafe fn set_front_face(&self, command_buffer: vk::CommandBuffer, front_face: vk::FrontFace) {
        if let Some(cmd_set_front_face) = self.cmd_set_front_face {
            unsafe { cmd_set_front_face(command_buffer, front_face) };
        }
    }

    unsafe fn set_primitive_topology(
        &self,
        command_buffer: vk::CommandBuffer,
        primitive_topology: vk::PrimitiveTopology,
    ) {
        if let Some(cmd_set_primitive_topology) = self.cmd_set_primitive_topology {
            unsafe { cmd_set_primitive_topology(command_buffer, primitive_topology) };
        }
    }

    unsafe fn set_depth_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        if let Some(cmd_set_depth_test_enable) = self.cmd_set_depth_test_enable {
            unsafe { cmd_set_depth_test_enable(command_buffer, enable.into()) };
        }
    }

    unsafe fn set_depth_write_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        if let Some(cmd_set_depth_write_enable) = self.cmd_set_depth_write_enable {
            unsafe { cmd_set_depth_write_enable(command_buffer, enable.into()) };
        }
    }

    unsafe fn set_depth_compare_op(
        &self,
        command_buffer: vk::CommandBuffer,
        compare_op: vk::CompareOp,
    ) {
        if let Some(cmd_set_depth_compare_op) = self.cmd_set_depth_compare_op {
            unsafe { cmd_set_depth_compare_op(command_buffer, compare_op) };
        }
    }

    unsafe fn set_depth_bounds_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        if let Some(cmd_set_depth_bounds_test_enable) = self.cmd_set_depth_bounds_test_enable {
            unsafe { cmd_set_depth_bounds_test_enable(command_buffer, enable.into()) };
        }
    }

    unsafe fn set_stencil_test_enable(&self, command_buffer: vk::CommandBuffer, enable: bool) {
        if let Some(cmd_set_stencil_test_enable) = self.cmd_set_stencil_test_enable {
            unsafe { cmd_set_stencil_test_enable(command_buffer, enable.into()) };
        }
    }

    unsafe fn set_stencil_op(
        &self,
        command_buffer: vk::CommandBuffer,
        face_mask: vk::StencilFaceFlags,
        fail_op: vk::StencilOp,
        pass_op: vk::StencilOp,
        depth_fail_op: vk::StencilOp,
        compare_op: vk::CompareOp,
    ) {
        if let Some(cmd_set_stencil_op) = self.cmd_set_stencil_op {
            unsafe {
                cmd_set_stencil_op(
                    command_buffer,
                    face_mask,
                    fail_op,
                    pass_op,
                    depth_fail_op,
                    compare_op,
                )
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandRecorder, VulkanCmdFns};
    use ash::vk;
    use std::{
        ffi::{c_void, CStr},
        ptr,
        sync::atomic::{AtomicU32, Ordering},
    };

    static CULL_MODE: AtomicU32 = AtomicU32::new(0);
    static DEPTH_TEST: AtomicU32 = AtomicU32::new(0);

    unsafe extern "system" fn set_cull_mode_ext(
        _command_buffer: vk::CommandBuffer,
        cull_mode: vk::CullModeFlags,
    ) {
        CULL_MODE.store(cull_mode.as_raw(), Ordering::SeqCst);
    }

    unsafe extern "system" fn set_depth_test_enable(
        _command_buffer: vk::CommandBuffer,
        enable: vk::Bool32,
    ) {
        DEPTH_TEST.store(enable, Ordering::SeqCst);
    }

    #[test]
    fn load_with_fallback() {
        let mut requested = Vec::new();
        let fns = unsafe {
            VulkanCmdFns::load(|name: &CStr| {
                requested.push(name.to_owned());

                if name == c"vkCmdSetCullModeEXT" {
                    set_cull_mode_ext as *const c_void
                } else if name == c"vkCmdSetDepthTestEnable" {
                    set_depth_test_enable as *const c_void
                } else {
                    ptr::null()
                }
            })
        };

        // The core name is always tried first.
        let core = requested.iter().position(|n| n.as_c_str() == c"vkCmdSetCullMode");
        let ext = requested
            .iter()
            .position(|n| n.as_c_str() == c"vkCmdSetCullModeEXT");
        assert!(core.unwrap() < ext.unwrap());
        // The extension name isn't tried once the core one resolved.
        assert!(!requested
            .iter()
            .any(|n| n.as_c_str() == c"vkCmdSetDepthTestEnableEXT"));

        assert!(fns.cmd_set_cull_mode.is_some());
        assert!(fns.cmd_set_depth_test_enable.is_some());
        assert!(fns.cmd_bind_pipeline.is_none());

        let cmd = vk::CommandBuffer::null();
        unsafe {
            fns.set_cull_mode(cmd, vk::CullModeFlags::FRONT_AND_BACK);
            fns.set_depth_test_enable(cmd, true);
            // Missing entry points are skipped.
            fns.bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, vk::Pipeline::null());
        }

        assert_eq!(
            CULL_MODE.load(Ordering::SeqCst),
            vk::CullModeFlags::FRONT_AND_BACK.as_raw(),
        );
        assert_eq!(DEPTH_TEST.load(Ordering::SeqCst), vk::TRUE);
    }
}
