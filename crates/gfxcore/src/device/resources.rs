//! Handles to GPU resources owned by a device.
//!
//! Handles are cheap clones of one shared object and compare by identity.
//! Resources are released explicitly with `destroy`; releasing is idempotent
//! and becomes a no-op once the owning device is gone.

use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::cache::Destroy;
use crate::scope::UniformValue;

use super::graphics_device::{DeviceInner, DeviceStatus};
use super::types::{IndexFormat, ResourceId, TextureDesc, VertexFormat};

struct ResourceCore {
    id: ResourceId,
    device: Weak<DeviceInner>,
    destroyed: Cell<bool>,
}

impl ResourceCore {
    fn new(id: ResourceId, device: Weak<DeviceInner>) -> Self {
        Self {
            id,
            device,
            destroyed: Cell::new(false),
        }
    }

    /// Runs `before` and then frees the native object, at most once.
    fn release(&self, before: impl FnOnce(&DeviceInner)) {
        if self.destroyed.replace(true) {
            return;
        }
        let Some(device) = self.device.upgrade() else {
            return;
        };
        if device.status.get() == DeviceStatus::Destroyed {
            return;
        }
        before(&device);
        match device.backend.try_borrow_mut() {
            Ok(mut backend) => backend.destroy_resource(self.id),
            Err(_) => tracing::warn!(id = self.id.0, "backend busy; resource release skipped"),
        };
    }
}

#[derive(Clone)]
pub struct Texture {
    inner: Rc<TextureInner>,
}

struct TextureInner {
    core: ResourceCore,
    desc: TextureDesc,
}

impl Texture {
    pub(crate) fn new(id: ResourceId, desc: TextureDesc, device: Weak<DeviceInner>) -> Self {
        Self {
            inner: Rc::new(TextureInner {
                core: ResourceCore::new(id, device),
                desc,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.core.id
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.inner.desc
    }

    pub fn name(&self) -> &str {
        &self.inner.desc.name
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core.destroyed.get()
    }

    /// Frees the texture and unbinds it from every scope slot that holds it.
    pub fn destroy(&self) {
        let value = UniformValue::Texture(self.clone());
        self.inner.core.release(|device| {
            let cleared = device.scope.remove_value(&value);
            if cleared > 0 {
                tracing::debug!(texture = %self.name(), cleared, "unbound destroyed texture");
            }
        });
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Destroy for Texture {
    fn destroy(&self) {
        Texture::destroy(self);
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id().0)
            .field("name", &self.name())
            .field("size", &(self.width(), self.height()))
            .finish()
    }
}

#[derive(Clone)]
pub struct VertexBuffer {
    inner: Rc<VertexBufferInner>,
}

struct VertexBufferInner {
    core: ResourceCore,
    format: VertexFormat,
    vertex_count: u32,
}

impl VertexBuffer {
    pub(crate) fn new(
        id: ResourceId,
        format: VertexFormat,
        vertex_count: u32,
        device: Weak<DeviceInner>,
    ) -> Self {
        Self {
            inner: Rc::new(VertexBufferInner {
                core: ResourceCore::new(id, device),
                format,
                vertex_count,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.core.id
    }

    pub fn format(&self) -> &VertexFormat {
        &self.inner.format
    }

    pub fn vertex_count(&self) -> u32 {
        self.inner.vertex_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core.destroyed.get()
    }

    pub fn destroy(&self) {
        self.inner.core.release(|_| {});
    }
}

impl PartialEq for VertexBuffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Destroy for VertexBuffer {
    fn destroy(&self) {
        VertexBuffer::destroy(self);
    }
}

impl fmt::Debug for VertexBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("id", &self.id().0)
            .field("vertices", &self.vertex_count())
            .finish()
    }
}

#[derive(Clone)]
pub struct IndexBuffer {
    inner: Rc<IndexBufferInner>,
}

struct IndexBufferInner {
    core: ResourceCore,
    format: IndexFormat,
    index_count: u32,
}

impl IndexBuffer {
    pub(crate) fn new(
        id: ResourceId,
        format: IndexFormat,
        index_count: u32,
        device: Weak<DeviceInner>,
    ) -> Self {
        Self {
            inner: Rc::new(IndexBufferInner {
                core: ResourceCore::new(id, device),
                format,
                index_count,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.core.id
    }

    pub fn format(&self) -> IndexFormat {
        self.inner.format
    }

    pub fn index_count(&self) -> u32 {
        self.inner.index_count
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core.destroyed.get()
    }

    pub fn destroy(&self) {
        self.inner.core.release(|_| {});
    }
}

impl PartialEq for IndexBuffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for IndexBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBuffer")
            .field("id", &self.id().0)
            .field("format", &self.format())
            .field("indices", &self.index_count())
            .finish()
    }
}

/// Offscreen color target with an optional depth attachment.
#[derive(Clone)]
pub struct RenderTarget {
    inner: Rc<RenderTargetInner>,
}

struct RenderTargetInner {
    core: ResourceCore,
    color: Texture,
    depth: bool,
}

impl RenderTarget {
    pub(crate) fn new(
        id: ResourceId,
        color: Texture,
        depth: bool,
        device: Weak<DeviceInner>,
    ) -> Self {
        Self {
            inner: Rc::new(RenderTargetInner {
                core: ResourceCore::new(id, device),
                color,
                depth,
            }),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.inner.core.id
    }

    pub fn color(&self) -> &Texture {
        &self.inner.color
    }

    pub fn has_depth(&self) -> bool {
        self.inner.depth
    }

    pub fn width(&self) -> u32 {
        self.inner.color.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.color.height()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.core.destroyed.get()
    }

    /// Frees the target. The color texture is left alive unless
    /// `destroy_color` is set.
    pub fn destroy(&self, destroy_color: bool) {
        let id = self.id();
        self.inner.core.release(|device| {
            let mut state = device.state.borrow_mut();
            if state.target.as_ref().map(RenderTarget::id) == Some(id) {
                state.target = None;
            }
        });
        if destroy_color {
            self.inner.color.destroy();
        }
    }
}

impl PartialEq for RenderTarget {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTarget")
            .field("id", &self.id().0)
            .field("size", &(self.width(), self.height()))
            .field("depth", &self.has_depth())
            .finish()
    }
}
