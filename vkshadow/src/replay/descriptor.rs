// Copyright (c) 2026 The vkshadow developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Replaying descriptor set bindings.
//!
//! Dynamic offsets are matched to the dynamic descriptors of the bound sets in order, so which
//! offset belongs to which set depends on the set layouts. Those aren't tracked, which means a
//! bind call carrying dynamic offsets can only ever be replayed as a whole.

use crate::{
    fns::CommandRecorder,
    slots::{contiguous_runs, set_bits},
    state::{BindPointState, DescriptorBindCall},
    MAX_REPLAYED_DYNAMIC_OFFSETS,
};
use ash::vk;
use smallvec::SmallVec;

/// Rebinds the sets in `required_set_mask` that are bound in `state`, as the graphics bind point.
///
/// Each bind call that bound one of the required sets is reissued, in recording order. A call
/// without dynamic offsets is cut down to the required sets it bound, one command per contiguous
/// range of them.
pub(crate) unsafe fn replay_graphics_sets(
    fns: &dyn CommandRecorder,
    dst: vk::CommandBuffer,
    state: &BindPointState,
    required_set_mask: u32,
    override_layout: Option<vk::PipelineLayout>,
) {
    if state.bind_calls.is_empty() {
        return;
    }

    // Which of the required sets each call still owns, keyed by call index.
    let mut owned: SmallVec<[(u32, u32); 4]> = SmallVec::new();

    for slot in set_bits(required_set_mask) {
        let Some(binding) = state.bound_set(slot) else {
            continue;
        };

        let call_index = binding.bind_call_index;
        let Some(call) = state.bind_calls.get(call_index as usize) else {
            tracing::error!(
                slot,
                call_index,
                call_count = state.bind_calls.len(),
                "descriptor set refers to a bind call that doesn't exist",
            );
            continue;
        };

        let Some(range) = call.set_range() else {
            tracing::error!(
                call_index,
                first_set = call.first_set,
                count = call.descriptor_set_count,
                "descriptor set bind call range overflows",
            );
            continue;
        };

        if !range.contains(&slot) {
            tracing::error!(
                slot,
                call_index,
                ?range,
                "descriptor set is outside the range of the bind call that supposedly bound it",
            );
            continue;
        }

        match owned.iter_mut().find(|(index, _)| *index == call_index) {
            Some((_, mask)) => *mask |= 1 << slot,
            None => owned.push((call_index, 1 << slot)),
        }
    }

    owned.sort_unstable_by_key(|&(call_index, _)| call_index);

    for (call_index, mask) in owned {
        let call = &state.bind_calls[call_index as usize];
        let layout = override_layout.unwrap_or(call.layout);

        if layout == vk::PipelineLayout::null() {
            continue;
        }

        let Some(sets) = declared_sets(call, call_index) else {
            continue;
        };

        if !call.dynamic_offsets.is_empty() {
            tracing::debug!(
                call_index,
                first_set = call.first_set,
                count = call.descriptor_set_count,
                dynamic_offsets = call.dynamic_offsets.len(),
                "replaying descriptor set bind call verbatim because it has dynamic offsets",
            );

            unsafe {
                fns.bind_descriptor_sets(
                    dst,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    call.first_set,
                    sets,
                    &call.dynamic_offsets,
                )
            };

            continue;
        }

        for run in contiguous_runs(mask) {
            // `run` lies within the call's range, which was checked above.
            let start = (run.start - call.first_set) as usize;
            let end = (run.end - call.first_set) as usize;

            unsafe {
                fns.bind_descriptor_sets(
                    dst,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    run.start,
                    &sets[start..end],
                    &[],
                )
            };
        }
    }
}

/// Reissues every compute bind call as it was recorded.
pub(crate) unsafe fn replay_compute_sets(
    fns: &dyn CommandRecorder,
    dst: vk::CommandBuffer,
    state: &BindPointState,
) {
    for (call_index, call) in state.bind_calls.iter().enumerate() {
        if call.layout == vk::PipelineLayout::null() || call.descriptor_set_count == 0 {
            continue;
        }

        let Some(sets) = declared_sets(call, call_index as u32) else {
            continue;
        };

        if call.dynamic_offsets.len() > MAX_REPLAYED_DYNAMIC_OFFSETS {
            tracing::error!(
                call_index,
                dynamic_offsets = call.dynamic_offsets.len(),
                max = MAX_REPLAYED_DYNAMIC_OFFSETS,
                "compute descriptor set bind call has too many dynamic offsets, skipping it",
            );
            continue;
        }

        unsafe {
            fns.bind_descriptor_sets(
                dst,
                vk::PipelineBindPoint::COMPUTE,
                call.layout,
                call.first_set,
                sets,
                &call.dynamic_offsets,
            )
        };
    }
}

/// Returns the sets the call declares, or `None` if fewer were stored.
fn declared_sets(call: &DescriptorBindCall, call_index: u32) -> Option<&[vk::DescriptorSet]> {
    let count = call.descriptor_set_count as usize;

    if count > call.sets.len() {
        tracing::error!(
            call_index,
            count,
            stored = call.sets.len(),
            "descriptor set bind call declares more sets than were recorded, skipping it",
        );
        return None;
    }

    if count == 0 && !call.dynamic_offsets.is_empty() {
        tracing::error!(
            call_index,
            dynamic_offsets = call.dynamic_offsets.len(),
            "descriptor set bind call has dynamic offsets but no sets, skipping it",
        );
        return None;
    }

    Some(&call.sets[..count])
}
