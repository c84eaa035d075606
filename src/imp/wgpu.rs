// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
wgpu backend.

```no_run
# use framestream::imp::wgpu::{EntryPoint, WgpuDevice};
let entry_point = EntryPoint::new();
let device = WgpuDevice::bind_blocking(&entry_point, None).unwrap();
```

Surfaces come from [EntryPoint::create_surface] and are wrapped with [WgpuSurface::new] once the
device exists.
*/

mod command;
mod device;
mod entry_point;
mod error;
mod fence;
mod queue;
mod resource;
mod surface;

pub use command::WgpuCommandList;
pub use device::WgpuDevice;
pub use entry_point::EntryPoint;
pub use error::Error;
pub use fence::WgpuFence;
pub use queue::WgpuQueue;
pub use resource::{WgpuBuffer, WgpuTexture, WgpuView};
pub use surface::WgpuSurface;
