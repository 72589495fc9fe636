//! Graphics device façade and its backends.

mod backend;
mod create;
mod events;
mod graphics_device;
mod null;
mod resources;
mod types;
#[cfg(feature = "gpu")]
mod gpu;

pub use backend::{
    DeviceBackend, DrawCall, PipelineState, Readback, TextureBinding, UniformUpload,
    VertexBinding,
};
pub use create::create_graphics_device;
pub use events::{DeviceEvent, DeviceEventKind, DeviceEvents, ListenerId};
pub use graphics_device::{DeviceResources, GraphicsDevice};
pub use null::{BackendCall, CallLog, NullBackend, NullOptions};
pub use resources::{IndexBuffer, RenderTarget, Texture, VertexBuffer};
pub use types::*;
#[cfg(feature = "gpu")]
pub use gpu::WgpuBackend;
