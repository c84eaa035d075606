// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! framestream keeps a GPU busy across several in-flight frames while textures stream in on a
background thread.

The pieces, from the bottom up:

| Module          | Role                                                                                  |
|-----------------|---------------------------------------------------------------------------------------|
| [gpu]           | The device model: queues, fences, command lists, textures, presentation surfaces       |
| [fence]         | [fence::FenceSynchronizer] paces the CPU against the GPU over N slots                  |
| [multibuffer]   | [multibuffer::ResourceSet] holds one resource and view per slot                        |
| [upload]        | [upload::Trampoline] stages pixels in a CPU-visible buffer and copies them to textures |
| [asset]         | Reads the raw image format and png files                                               |
| [loader]        | [loader::Loader] streams a queue of assets on its own thread and hands them off        |
| [frame]         | [frame::FrameLoop] records, submits and presents each frame                            |

# Synchronization

Every slot has a fence value.  When the CPU finishes recording a frame it signals the slot's value
on the queue, presents, and moves to the next slot.  Before recording into that slot it waits until
the GPU has reached the value the slot last signaled, so at most N-1 frames are ever queued ahead
of the GPU and no command list or back buffer is reused while the GPU still reads it.

The loader applies the same rule with a single slot: after each upload it waits until the copy is
done, because the next upload overwrites the same staging buffer.

# Backends

[imp::soft] runs on the CPU.  Each queue executes on its own thread and the device records
protocol violations instead of corrupting memory, which is what the tests run against.

[imp::wgpu] (feature `backend_wgpu`, on by default) runs on [wgpu](https://wgpu.rs).

# Configuration

[loader::LoaderConfig::from_env] and [frame::FrameConfig::from_env] read `FRAMESTREAM_PACING_MS`,
`FRAMESTREAM_TRAMPOLINE_EXTENT`, `FRAMESTREAM_SYNC_INTERVAL` and `FRAMESTREAM_ALLOW_TEARING`.
*/

pub mod asset;
mod config;
pub mod fence;
pub mod frame;
pub mod gpu;
pub mod imp;
pub mod loader;
pub mod multibuffer;
pub mod upload;

pub use config::{ALLOW_TEARING, PACING_MS, SYNC_INTERVAL, TRAMPOLINE_EXTENT};
