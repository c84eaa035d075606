// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Backends.

[soft] is always available: a software device whose queues run on their own threads, so GPU work
really does happen asynchronously to the CPU.  It validates the barrier and reuse rules the
pipeline depends on and is what the test-suite runs against.

[wgpu] maps the device seam onto wgpu.  It is enabled by the default `backend_wgpu` feature.
*/

pub mod soft;

#[cfg(feature = "backend_wgpu")]
pub mod wgpu;
