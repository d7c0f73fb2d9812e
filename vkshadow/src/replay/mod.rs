// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Reissuing tracked state onto another command buffer.
//!
//! Replay works on a [`CommandBufferState`] that has already been copied out of the tracker, so
//! it never holds the tracker's lock while commands are being recorded. State is applied in a
//! fixed order:
//!
//! 1. Pipelines.
//! 2. Descriptor sets.
//! 3. Push constants.
//! 4. Viewports and scissors.
//! 5. Extended dynamic state.
//! 6. Vertex and index buffers.
//!
//! [`ReplayParams`] selects which of these are applied.

use crate::{fns::CommandRecorder, state::CommandBufferState, BindPoint};
use ash::vk;
use smallvec::SmallVec;

mod descriptor;

/// Selects which parts of the tracked state are replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayParams {
    /// Rebind the graphics pipeline.
    ///
    /// The default value is `true`.
    pub replay_graphics_pipeline: bool,

    /// The graphics descriptor set slots to rebind, bit `i` standing for set `i`. Slots that are
    /// not bound are skipped.
    ///
    /// The default value is `0x1`.
    pub required_graphics_set_mask: u32,

    /// The pipeline layout to use for graphics descriptor sets and push constants, instead of the
    /// layout they were recorded with. A null layout counts as `None`.
    ///
    /// The default value is `None`.
    pub override_graphics_layout: Option<vk::PipelineLayout>,

    /// Replay push constant updates.
    ///
    /// The default value is `true`.
    pub replay_push_constants: bool,

    /// Replay viewports and scissors.
    ///
    /// The default value is `true`.
    pub replay_viewport_scissor: bool,

    /// Replay the extended dynamic state that was set.
    ///
    /// The default value is `true`.
    pub replay_extended_dynamic_state: bool,

    /// Rebind vertex buffers and the index buffer.
    ///
    /// The default value is `false`.
    pub replay_vertex_index: bool,

    /// Also replay the compute pipeline, all compute descriptor set bind calls and compute push
    /// constants.
    ///
    /// The default value is `false`.
    pub replay_compute_too: bool,
}

impl Default for ReplayParams {
    #[inline]
    fn default() -> Self {
        Self {
            replay_graphics_pipeline: true,
            required_graphics_set_mask: 0x1,
            override_graphics_layout: None,
            replay_push_constants: true,
            replay_viewport_scissor: true,
            replay_extended_dynamic_state: true,
            replay_vertex_index: false,
            replay_compute_too: false,
        }
    }
}

impl ReplayParams {
    /// Everything needed to issue another draw with the application's graphics state: the
    /// defaults, plus every graphics descriptor set and the vertex and index buffers.
    #[inline]
    pub fn graphics_draw() -> Self {
        Self {
            required_graphics_set_mask: u32::MAX,
            replay_vertex_index: true,
            ..Default::default()
        }
    }

    /// Every group of state, for both bind points.
    #[inline]
    pub fn everything() -> Self {
        Self {
            replay_compute_too: true,
            ..Self::graphics_draw()
        }
    }

    #[inline]
    fn override_layout(&self) -> Option<vk::PipelineLayout> {
        self.override_graphics_layout
            .filter(|&layout| layout != vk::PipelineLayout::null())
    }
}

/// The shader stages whose push constants are replayed for the graphics bind point.
pub const GRAPHICS_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw()
        | vk::ShaderStageFlags::TESSELLATION_CONTROL.as_raw()
        | vk::ShaderStageFlags::TESSELLATION_EVALUATION.as_raw()
        | vk::ShaderStageFlags::GEOMETRY.as_raw()
        | vk::ShaderStageFlags::FRAGMENT.as_raw()
        | vk::ShaderStageFlags::TASK_EXT.as_raw()
        | vk::ShaderStageFlags::MESH_EXT.as_raw(),
);

/// Records the parts of `state` selected by `params` into `dst`.
///
/// # Safety
///
/// - `dst` must be in the recording state, and every handle in `state` must still be valid.
/// - The recorded state must be compatible with `dst`. In particular, descriptor sets and push
///   constants are only valid with a compatible pipeline layout.
pub unsafe fn replay_from_snapshot(
    fns: &dyn CommandRecorder,
    state: &CommandBufferState,
    dst: vk::CommandBuffer,
    params: &ReplayParams,
) {
    let graphics = state.bind_point(BindPoint::Graphics);
    let compute = state.bind_point(BindPoint::Compute);
    let override_layout = params.override_layout();

    if params.replay_graphics_pipeline && graphics.pipeline != vk::Pipeline::null() {
        unsafe { fns.bind_pipeline(dst, vk::PipelineBindPoint::GRAPHICS, graphics.pipeline) };
    }

    if params.replay_compute_too && compute.pipeline != vk::Pipeline::null() {
        unsafe { fns.bind_pipeline(dst, vk::PipelineBindPoint::COMPUTE, compute.pipeline) };
    }

    unsafe {
        descriptor::replay_graphics_sets(
            fns,
            dst,
            graphics,
            params.required_graphics_set_mask,
            override_layout,
        )
    };

    if params.replay_compute_too {
        unsafe { descriptor::replay_compute_sets(fns, dst, compute) };
    }

    if params.replay_push_constants {
        unsafe { replay_push_constants(fns, state, dst, GRAPHICS_STAGES, override_layout) };

        if params.replay_compute_too {
            unsafe {
                replay_push_constants(fns, state, dst, vk::ShaderStageFlags::COMPUTE, None)
            };
        }
    }

    if params.replay_viewport_scissor {
        for (first, viewports) in state.dynamic.viewports.runs() {
            unsafe { fns.set_viewport(dst, first, viewports) };
        }

        for (first, scissors) in state.dynamic.scissors.runs() {
            unsafe { fns.set_scissor(dst, first, scissors) };
        }
    }

    if params.replay_extended_dynamic_state {
        unsafe { replay_extended_dynamic_state(fns, state, dst) };
    }

    if params.replay_vertex_index {
        let mut buffers: SmallVec<[vk::Buffer; 8]> = SmallVec::new();
        let mut offsets: SmallVec<[vk::DeviceSize; 8]> = SmallVec::new();

        for (first, bindings) in state.vertex_input.buffers.runs() {
            buffers.clear();
            offsets.clear();
            buffers.extend(bindings.iter().map(|binding| binding.buffer));
            offsets.extend(bindings.iter().map(|binding| binding.offset));

            unsafe { fns.bind_vertex_buffers(dst, first, &buffers, &offsets) };
        }

        if let Some(index_buffer) = &state.vertex_input.index_buffer {
            unsafe {
                fns.bind_index_buffer(
                    dst,
                    index_buffer.buffer,
                    index_buffer.offset,
                    index_buffer.index_type,
                )
            };
        }
    }
}

/// Reissues, in recording order, every push constant update that touches one of `stages`.
unsafe fn replay_push_constants(
    fns: &dyn CommandRecorder,
    state: &CommandBufferState,
    dst: vk::CommandBuffer,
    stages: vk::ShaderStageFlags,
    override_layout: Option<vk::PipelineLayout>,
) {
    for entry in &state.push_constants {
        if !entry.stages().intersects(stages) {
            continue;
        }

        let layout = override_layout.unwrap_or(entry.layout());

        if layout == vk::PipelineLayout::null() || entry.size() == 0 {
            continue;
        }

        unsafe { fns.push_constants(dst, layout, entry.stages(), entry.offset(), entry.data()) };
    }
}

unsafe fn replay_extended_dynamic_state(
    fns: &dyn CommandRecorder,
    state: &CommandBufferState,
    dst: vk::CommandBuffer,
) {
    let dynamic = &state.dynamic;

    if let Some(cull_mode) = dynamic.cull_mode {
        unsafe { fns.set_cull_mode(dst, cull_mode) };
    }

    if let Some(front_face) = dynamic.front_face {
        unsafe { fns.set_front_face(dst, front_face) };
    }

    if let Some(primitive_topology) = dynamic.primitive_topology {
        unsafe { fns.set_primitive_topology(dst, primitive_topology) };
    }

    if let Some(enable) = dynamic.depth_test_enable {
        unsafe { fns.set_depth_test_enable(dst, enable) };
    }

    if let Some(enable) = dynamic.depth_write_enable {
        unsafe { fns.set_depth_write_enable(dst, enable) };
    }

    if let Some(compare_op) = dynamic.depth_compare_op {
        unsafe { fns.set_depth_compare_op(dst, compare_op) };
    }

    if let Some(enable) = dynamic.depth_bounds_test_enable {
        unsafe { fns.set_depth_bounds_test_enable(dst, enable) };
    }

    if let Some(enable) = dynamic.stencil_test_enable {
        unsafe { fns.set_stencil_test_enable(dst, enable) };
    }

    if let Some(stencil_op) = &dynamic.stencil_op {
        unsafe {
            fns.set_stencil_op(
                dst,
                stencil_op.face_mask,
                stencil_op.fail_op,
                stencil_op.pass_op,
                stencil_op.depth_fail_op,
                stencil_op.compare_op,
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::{replay_from_snapshot, ReplayParams};
    use crate::{
        state::{
            CommandBufferState, DescriptorBindCall, IndexBufferBinding, PushConstantEntry,
            StencilOpState,
        },
        tests::{Call, RecordingSink},
        BindPoint,
    };
    use ash::vk;
    use smallvec::smallvec;

    fn push(state: &mut CommandBufferState, layout: u64, stages: vk::ShaderStageFlags, tag: u8) {
        state.record_push_constants(
            BindPoint::Graphics,
            PushConstantEntry::new(handle!(PipelineLayout, layout), stages, 0, &[tag; 4]),
        );
    }

    fn push_tags(calls: &[Call]) -> Vec<u8> {
        calls
            .iter()
            .filter_map(|call| match call {
                Call::PushConstants { values, .. } => Some(values[0]),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn defaults() {
        let params = ReplayParams::default();
        assert!(params.replay_graphics_pipeline);
        assert_eq!(params.required_graphics_set_mask, 0x1);
        assert_eq!(params.override_graphics_layout, None);
        assert!(params.replay_push_constants);
        assert!(params.replay_viewport_scissor);
        assert!(params.replay_extended_dynamic_state);
        assert!(!params.replay_vertex_index);
        assert!(!params.replay_compute_too);

        assert!(ReplayParams::everything().replay_compute_too);
        assert!(ReplayParams::graphics_draw().replay_vertex_index);
    }

    #[test]
    fn push_constants_keep_order_and_filter_stages() {
        let mut state = CommandBufferState::new();
        push(&mut state, 1, vk::ShaderStageFlags::VERTEX, 1);
        push(&mut state, 1, vk::ShaderStageFlags::COMPUTE, 2);
        push(
            &mut state,
            1,
            vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::COMPUTE,
            3,
        );
        push(&mut state, 0, vk::ShaderStageFlags::FRAGMENT, 4);
        push(&mut state, 1, vk::ShaderStageFlags::MESH_EXT, 5);
        state.push_constants.push(PushConstantEntry::new(
            handle!(PipelineLayout, 1),
            vk::ShaderStageFlags::VERTEX,
            0,
            &[],
        ));

        let sink = RecordingSink::new();
        let dst = handle!(CommandBuffer, 99);
        let params = ReplayParams {
            replay_graphics_pipeline: false,
            required_graphics_set_mask: 0,
            ..Default::default()
        };
        unsafe { replay_from_snapshot(&sink, &state, dst, &params) };
        assert_eq!(push_tags(&sink.take()), [1, 3, 5]);

        let params = ReplayParams {
            replay_compute_too: true,
            ..params
        };
        unsafe { replay_from_snapshot(&sink, &state, dst, &params) };
        assert_eq!(push_tags(&sink.take()), [1, 3, 5, 2, 3]);

        // The override layout replaces the recorded one for graphics, including a null one.
        let params = ReplayParams {
            override_graphics_layout: Some(handle!(PipelineLayout, 8)),
            replay_compute_too: false,
            ..params
        };
        unsafe { replay_from_snapshot(&sink, &state, dst, &params) };
        let calls = sink.take();
        assert_eq!(push_tags(&calls), [1, 3, 4, 5]);
        assert!(calls.iter().all(|call| matches!(
            call,
            Call::PushConstants { layout, .. } if *layout == handle!(PipelineLayout, 8),
        )));
    }

    #[test]
    fn fixed_order() {
        let mut state = CommandBufferState::new();
        state.begin(vk::CommandBufferUsageFlags::empty(), 0);
        state.bind_point_mut(BindPoint::Graphics).pipeline = handle!(Pipeline, 1);
        state.bind_point_mut(BindPoint::Compute).pipeline = handle!(Pipeline, 2);
        state.record_descriptor_bind(
            BindPoint::Graphics,
            DescriptorBindCall {
                layout: handle!(PipelineLayout, 1),
                first_set: 0,
                descriptor_set_count: 1,
                sets: smallvec![handle!(DescriptorSet, 1)],
                dynamic_offsets: smallvec![],
            },
        );
        state.record_descriptor_bind(
            BindPoint::Compute,
            DescriptorBindCall {
                layout: handle!(PipelineLayout, 2),
                first_set: 0,
                descriptor_set_count: 1,
                sets: smallvec![handle!(DescriptorSet, 2)],
                dynamic_offsets: smallvec![],
            },
        );
        push(&mut state, 1, vk::ShaderStageFlags::VERTEX, 1);
        state.set_viewports(0, &[vk::Viewport::default()]);
        state.set_scissors(0, &[vk::Rect2D::default()]);
        state.dynamic.cull_mode = Some(vk::CullModeFlags::BACK);
        state.bind_vertex_buffers(0, &[handle!(Buffer, 1)], &[0]);
        state.vertex_input.index_buffer = Some(IndexBufferBinding {
            buffer: handle!(Buffer, 2),
            offset: 0,
            index_type: vk::IndexType::UINT16,
        });

        let sink = RecordingSink::new();
        let dst = handle!(CommandBuffer, 99);
        unsafe { replay_from_snapshot(&sink, &state, dst, &ReplayParams::everything()) };

        let kinds: Vec<_> = sink
            .take()
            .into_iter()
            .map(|call| match call {
                Call::BindPipeline { bind_point, .. } => format!("pipeline {bind_point:?}"),
                Call::BindDescriptorSets { bind_point, .. } => format!("sets {bind_point:?}"),
                Call::PushConstants { .. } => "push".to_owned(),
                Call::SetViewport { .. } => "viewport".to_owned(),
                Call::SetScissor { .. } => "scissor".to_owned(),
                Call::SetCullMode(_) => "cull".to_owned(),
                Call::BindVertexBuffers { .. } => "vertex".to_owned(),
                Call::BindIndexBuffer { .. } => "index".to_owned(),
                call => panic!("unexpected {call:?}"),
            })
            .collect();

        assert_eq!(
            kinds,
            [
                "pipeline GRAPHICS",
                "pipeline COMPUTE",
                "sets GRAPHICS",
                "sets COMPUTE",
                "push",
                "viewport",
                "scissor",
                "cull",
                "vertex",
                "index",
            ],
        );
        assert_eq!(sink.take_targets(), [dst; 10]);
    }

    #[test]
    fn runs_and_extended_state() {
        let mut state = CommandBufferState::new();
        state.set_viewports(0, &[vk::Viewport::default().width(1.0)]);
        state.set_viewports(
            2,
            &[
                vk::Viewport::default().width(3.0),
                vk::Viewport::default().width(4.0),
            ],
        );
        state.set_scissors(
            1,
            &[vk::Rect2D::default().extent(vk::Extent2D {
                width: 8,
                height: 9,
            })],
        );
        state.bind_vertex_buffers(
            2,
            &[handle!(Buffer, 1), handle!(Buffer, 2), handle!(Buffer, 3)],
            &[0, 16, 32],
        );
        state.dynamic.depth_test_enable = Some(false);
        state.dynamic.stencil_op = Some(StencilOpState {
            face_mask: vk::StencilFaceFlags::FRONT,
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::REPLACE,
            depth_fail_op: vk::StencilOp::ZERO,
            compare_op: vk::CompareOp::ALWAYS,
        });

        let sink = RecordingSink::new();
        let params = ReplayParams {
            replay_vertex_index: true,
            ..Default::default()
        };
        unsafe { replay_from_snapshot(&sink, &state, handle!(CommandBuffer, 99), &params) };

        assert_eq!(
            sink.take(),
            [
                Call::SetViewport {
                    first: 0,
                    widths: vec![1.0],
                },
                Call::SetViewport {
                    first: 2,
                    widths: vec![3.0, 4.0],
                },
                Call::SetScissor {
                    first: 1,
                    extents: vec![(8, 9)],
                },
                Call::SetDepthTestEnable(false),
                Call::SetStencilOp {
                    face_mask: vk::StencilFaceFlags::FRONT,
                    fail_op: vk::StencilOp::KEEP,
                    pass_op: vk::StencilOp::REPLACE,
                    depth_fail_op: vk::StencilOp::ZERO,
                    compare_op: vk::CompareOp::ALWAYS,
                },
                Call::BindVertexBuffers {
                    first: 2,
                    buffers: vec![handle!(Buffer, 1), handle!(Buffer, 2), handle!(Buffer, 3)],
                    offsets: vec![0, 16, 32],
                },
            ],
        );
    }

    #[test]
    fn disabled_groups_are_skipped() {
        let mut state = CommandBufferState::new();
        state.bind_point_mut(BindPoint::Graphics).pipeline = handle!(Pipeline, 1);
        push(&mut state, 1, vk::ShaderStageFlags::VERTEX, 1);
        state.set_viewports(0, &[vk::Viewport::default()]);
        state.dynamic.front_face = Some(vk::FrontFace::CLOCKWISE);
        state.bind_vertex_buffers(0, &[handle!(Buffer, 1)], &[0]);

        let sink = RecordingSink::new();
        let params = ReplayParams {
            replay_graphics_pipeline: false,
            replay_push_constants: false,
            replay_viewport_scissor: false,
            replay_extended_dynamic_state: false,
            replay_vertex_index: false,
            ..Default::default()
        };
        unsafe { replay_from_snapshot(&sink, &state, handle!(CommandBuffer, 99), &params) };

        assert!(sink.take().is_empty());
    }
}
