// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Multibuffered resource sets.

A [ResourceSet] holds N resources and one view of each, indexed by slot.  The resources either come
from a presentation surface's back buffers or are supplied by the caller (off-screen targets such as
shadow maps).

Each slot stores its resource and view together, so a view can never refer to anything but the
resource in its own slot.
*/

use crate::fence::Drained;
use crate::gpu::{Device, DeviceError, PresentError, PresentSurface, ViewKind};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BindError {
    #[error("Surface has {available} buffers but the set has {needed} slots")]
    BufferCountMismatch { available: usize, needed: usize },
    #[error(transparent)]
    Surface(#[from] PresentError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug)]
struct Slot<D: Device> {
    resource: D::Texture,
    view: D::View,
}

/**
N resources and their views.
*/
#[derive(Debug)]
pub struct ResourceSet<D: Device, const N: usize> {
    kind: ViewKind,
    slots: [Option<Slot<D>>; N],
}

impl<D: Device, const N: usize> ResourceSet<D, N> {
    /// An empty set whose views will be of `kind`.
    pub fn new(kind: ViewKind) -> Self {
        ResourceSet {
            kind,
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn view_kind(&self) -> ViewKind {
        self.kind
    }

    fn make_slot(device: &D, kind: ViewKind, resource: D::Texture) -> Result<Slot<D>, DeviceError> {
        let view = device.create_view(&resource, kind)?;
        Ok(Slot { resource, view })
    }

    /// Takes the surface's N back buffers and creates a view of each.
    ///
    /// The surface must have exactly N buffers, since its present index selects the slot.
    /// On failure the set keeps what it held before.
    pub fn bind_to_display_surface<S: PresentSurface<D>>(
        &mut self,
        device: &D,
        surface: &S,
    ) -> Result<(), BindError> {
        let available = surface.buffer_count();
        if available != N {
            return Err(BindError::BufferCountMismatch {
                available,
                needed: N,
            });
        }
        let mut slots: [Option<Slot<D>>; N] = std::array::from_fn(|_| None);
        for (i, slot) in slots.iter_mut().enumerate() {
            let resource = surface.back_buffer(i)?;
            *slot = Some(Self::make_slot(device, self.kind, resource)?);
        }
        self.slots = slots;
        logwise::trace_sync!("bound {n} slots to display surface", n = N);
        Ok(())
    }

    /**
    Assigns caller-created resources to the first slots, creating a view of each.

    At most N are used; extra resources are ignored with a warning.  Slots past the end of
    `resources` are left empty.  Returns how many slots were filled.
    */
    pub fn bind_explicit(
        &mut self,
        device: &D,
        resources: &[D::Texture],
    ) -> Result<usize, BindError> {
        if resources.len() > N {
            logwise::warn_sync!(
                "bind_explicit got {given} resources for {n} slots; ignoring the rest",
                given = resources.len(),
                n = N
            );
        }
        let count = resources.len().min(N);
        let mut slots: [Option<Slot<D>>; N] = std::array::from_fn(|_| None);
        for (slot, resource) in slots.iter_mut().zip(resources) {
            *slot = Some(Self::make_slot(device, self.kind, resource.clone())?);
        }
        self.slots = slots;
        Ok(count)
    }

    /// Drops every resource and view.  The GPU must be idle, which `drained` attests.
    pub fn reset_all(&mut self, drained: Drained) {
        logwise::trace_sync!(
            "resetting resource set after fence {v}",
            v = drained.fence_value()
        );
        self.slots = std::array::from_fn(|_| None);
    }

    /// [Self::bind_to_display_surface] again after the surface was resized.
    pub fn rebind_to_display_surface<S: PresentSurface<D>>(
        &mut self,
        device: &D,
        surface: &S,
    ) -> Result<(), BindError> {
        self.bind_to_display_surface(device, surface)
    }

    /// The resource in slot `index`, or `None` if out of range or empty.
    pub fn resource(&self, index: usize) -> Option<&D::Texture> {
        self.slots.get(index)?.as_ref().map(|s| &s.resource)
    }

    /// The view of slot `index`, or `None` if out of range or empty.
    pub fn view(&self, index: usize) -> Option<&D::View> {
        self.slots.get(index)?.as_ref().map(|s| &s.view)
    }

    /// Views of all bound slots, in slot order.
    pub fn view_heap(&self) -> Vec<&D::View> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|s| &s.view))
            .collect()
    }

    /// Slots currently holding a resource.
    pub fn bound(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Swaps in a new resource for slot `index`, returning the one it replaces.
    pub fn replace(
        &mut self,
        device: &D,
        index: usize,
        resource: D::Texture,
    ) -> Result<Option<D::Texture>, BindError> {
        if index >= N {
            logwise::warn_sync!("replace: slot {index} out of range", index = index);
            return Ok(None);
        }
        let slot = Self::make_slot(device, self.kind, resource)?;
        Ok(self.slots[index].replace(slot).map(|s| s.resource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Format, QueueClass, TextureDesc};
    use crate::fence::FenceSynchronizer;
    use crate::imp::soft::{SoftDevice, SoftSurface};

    #[test]
    fn surface_binding_pairs_views_with_resources() {
        let device = SoftDevice::new();
        let surface = SoftSurface::new(&device, 3, 8, 8).unwrap();
        let mut set = ResourceSet::<SoftDevice, 3>::new(ViewKind::RenderTarget);
        set.bind_to_display_surface(&device, &surface).unwrap();
        for i in 0..3 {
            let resource = set.resource(i).unwrap();
            assert!(set.view(i).unwrap().texture().same_texture(resource));
            assert!(resource.same_texture(&surface.back_buffer(i).unwrap()));
        }
        assert!(set.resource(3).is_none());
        assert!(set.view(3).is_none());
        assert_eq!(set.view_heap().len(), 3);
    }

    #[test]
    fn too_few_back_buffers() {
        let device = SoftDevice::new();
        let surface = SoftSurface::new(&device, 2, 8, 8).unwrap();
        let mut set = ResourceSet::<SoftDevice, 3>::new(ViewKind::RenderTarget);
        assert!(matches!(
            set.bind_to_display_surface(&device, &surface),
            Err(BindError::BufferCountMismatch {
                available: 2,
                needed: 3
            })
        ));
        assert_eq!(set.bound(), 0);
    }

    #[test]
    fn too_many_back_buffers() {
        let device = SoftDevice::new();
        let surface = SoftSurface::new(&device, 3, 8, 8).unwrap();
        let mut set = ResourceSet::<SoftDevice, 2>::new(ViewKind::RenderTarget);
        assert!(matches!(
            set.bind_to_display_surface(&device, &surface),
            Err(BindError::BufferCountMismatch {
                available: 3,
                needed: 2
            })
        ));
        assert_eq!(set.bound(), 0);
    }

    #[test]
    fn explicit_binding_takes_at_most_n() {
        let device = SoftDevice::new();
        let textures: Vec<_> = (0..3)
            .map(|i| {
                device
                    .create_texture(&TextureDesc::sampled(
                        format!("shadow{i}"),
                        4,
                        4,
                        Format::Rgba8Unorm,
                    ))
                    .unwrap()
            })
            .collect();
        let mut set = ResourceSet::<SoftDevice, 2>::new(ViewKind::ShaderResource);
        assert_eq!(set.bind_explicit(&device, &textures).unwrap(), 2);
        assert!(set.resource(1).unwrap().same_texture(&textures[1]));

        let mut partial = ResourceSet::<SoftDevice, 2>::new(ViewKind::ShaderResource);
        assert_eq!(partial.bind_explicit(&device, &textures[..1]).unwrap(), 1);
        assert!(partial.resource(1).is_none());
        assert_eq!(partial.view_heap().len(), 1);
    }

    #[test]
    fn reset_then_rebind_after_resize() {
        let device = SoftDevice::new();
        let queue = device.create_queue(QueueClass::Graphics, "g").unwrap();
        let mut surface = SoftSurface::new(&device, 2, 8, 8).unwrap();
        let mut sync = FenceSynchronizer::<SoftDevice, 2>::new(&device, 0).unwrap();
        let mut set = ResourceSet::<SoftDevice, 2>::new(ViewKind::RenderTarget);
        set.bind_to_display_surface(&device, &surface).unwrap();

        assert!(surface.resize(16, 16).is_err());
        let drained = sync.block_until_current_slot_done(&queue).unwrap();
        set.reset_all(drained);
        assert_eq!(set.bound(), 0);
        surface.resize(16, 16).unwrap();
        set.rebind_to_display_surface(&device, &surface).unwrap();
        assert_eq!(set.resource(0).unwrap().width(), 16);
    }

    #[test]
    fn replace_returns_previous() {
        let device = SoftDevice::new();
        let make = |label: &str| {
            device
                .create_texture(&TextureDesc::sampled(label, 4, 4, Format::Rgba8Unorm))
                .unwrap()
        };
        let mut set = ResourceSet::<SoftDevice, 2>::new(ViewKind::ShaderResource);
        let first = make("a");
        assert!(set.replace(&device, 0, first.clone()).unwrap().is_none());
        let previous = set.replace(&device, 0, make("b")).unwrap().unwrap();
        assert!(previous.same_texture(&first));
        assert!(set.replace(&device, 2, make("c")).unwrap().is_none());
    }
}
