// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Queue-class state rules.

use super::{QueueClass, ResourceState};

/**
The state a texture is actually in after a copy recorded on a list of `class` completes,
when the caller asked for `requested`.

Copy queues demote everything they touch to [ResourceState::Common] on completion, so a barrier
on a copy list must name that state or it will disagree with what the GPU does.

| class    | requested | result    |
|----------|-----------|-----------|
| Copy     | any       | Common    |
| Graphics | s         | s         |
| Compute  | s         | s         |
*/
pub const fn post_copy_state(class: QueueClass, requested: ResourceState) -> ResourceState {
    match class {
        QueueClass::Copy => ResourceState::Common,
        QueueClass::Graphics | QueueClass::Compute => requested,
    }
}

/// Whether a barrier on a list of `class` may name `state`.
pub const fn permitted_on(class: QueueClass, state: ResourceState) -> bool {
    match class {
        QueueClass::Copy => matches!(
            state,
            ResourceState::Common | ResourceState::CopyDest | ResourceState::CopySource
        ),
        QueueClass::Compute => !matches!(
            state,
            ResourceState::RenderTarget | ResourceState::Present | ResourceState::DepthWrite
        ),
        QueueClass::Graphics => true,
    }
}
