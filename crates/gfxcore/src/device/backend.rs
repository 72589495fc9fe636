//! The seam between [`GraphicsDevice`](super::GraphicsDevice) and a native API.
//!
//! The device owns all binding bookkeeping (render state, uniform versions,
//! sampler fallbacks) and hands each backend fully resolved calls. Backends
//! only translate them.

use crate::draw_commands::DrawCommands;
use crate::error::Result;
use crate::scope::UniformValue;
use crate::shader::ProcessedShader;

use super::types::{
    BackendKind, BlendMode, ClearOptions, CullMode, DepthState, DeviceCapabilities, IndexFormat,
    Primitive, ProgramId, Rect, ResourceId, TextureDesc, VertexFormat,
};

/// A uniform whose scope version changed since the program last saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformUpload {
    /// Index into the program's uniform buffer format.
    pub slot: usize,
    pub name: String,
    pub value: UniformValue,
}

/// Texture bound to a program sampler for one draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub slot: u32,
    pub texture: ResourceId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineState {
    pub blend: BlendMode,
    pub depth: DepthState,
    pub cull: CullMode,
}

#[derive(Clone, Copy, Debug)]
pub struct VertexBinding<'a> {
    pub buffer: ResourceId,
    pub format: &'a VertexFormat,
}

/// Everything a backend needs to issue one draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall<'a> {
    pub program: ProgramId,
    pub primitive: Primitive,
    pub instances: u32,
    pub vertex_buffers: &'a [VertexBinding<'a>],
    pub index_buffer: Option<(ResourceId, IndexFormat)>,
    /// Only the values that changed; unchanged uniforms keep their last
    /// uploaded value inside the backend.
    pub uniforms: &'a [UniformUpload],
    pub textures: &'a [TextureBinding],
    pub state: PipelineState,
}

/// A texture copy on its way back to the CPU.
pub trait Readback {
    /// Advances the copy without blocking. `None` while it is in flight.
    fn poll(&mut self) -> Option<Result<Vec<u8>>>;
}

/// Readback whose pixels were available when it started.
pub(crate) struct ReadyReadback(pub(crate) Option<Vec<u8>>);

impl Readback for ReadyReadback {
    fn poll(&mut self) -> Option<Result<Vec<u8>>> {
        self.0.take().map(Ok)
    }
}

pub trait DeviceBackend {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> &DeviceCapabilities;

    /// Compiles and links a processed program. The error string is the
    /// native compiler log.
    fn create_program(&mut self, id: ProgramId, shader: &ProcessedShader) -> Result<(), String>;

    fn destroy_program(&mut self, id: ProgramId);

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        format: &VertexFormat,
        data: &[u8],
    ) -> Result<()>;

    fn create_index_buffer(&mut self, id: ResourceId, format: IndexFormat, data: &[u8])
        -> Result<()>;

    fn create_texture(&mut self, id: ResourceId, desc: &TextureDesc, data: Option<&[u8]>)
        -> Result<()>;

    /// Creates a render target drawing into the existing texture `color`.
    fn create_render_target(&mut self, id: ResourceId, color: ResourceId, depth: bool)
        -> Result<()>;

    fn destroy_resource(&mut self, id: ResourceId);

    /// `None` selects the back buffer.
    fn set_render_target(&mut self, target: Option<ResourceId>);

    fn set_viewport(&mut self, rect: Rect);

    fn set_scissor(&mut self, rect: Rect);

    fn clear(&mut self, options: &ClearOptions) -> Result<()>;

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()>;

    /// Issues every sub-draw of `commands` with the state of `call`. Only
    /// called when the capabilities report multi-draw support.
    fn multi_draw(&mut self, call: &DrawCall<'_>, commands: &DrawCommands) -> Result<()>;

    fn submit(&mut self) -> Result<()>;

    /// Starts reading back a texture as tightly packed RGBA8 rows.
    fn read_texture(&mut self, id: ResourceId) -> Result<Box<dyn Readback>>;

    fn resize(&mut self, width: u32, height: u32);

    /// Drops native objects after the context was lost.
    fn lose(&mut self);

    fn destroy(&mut self);
}
