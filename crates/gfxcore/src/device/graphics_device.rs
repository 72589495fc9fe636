//! The device façade: render state, uniform binding and lifecycle.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Poll;

use bytemuck::Pod;

use crate::cache::{Destroy, DeviceCache, DeviceCacheEntry};
use crate::draw_commands::DrawCommands;
use crate::error::{GraphicsError, Result};
use crate::scope::{ScopeSpace, UniformValue};
use crate::shader::{
    ChunkRegistry, CustomShaderDesc, PendingUniforms, PrecompileReport, ProcessedShader,
    ProgramLibrary, Shader, ShaderGenerator, VariantEntry,
};

use super::backend::{
    DeviceBackend, DrawCall, PipelineState, TextureBinding, UniformUpload, VertexBinding,
};
use super::events::{DeviceEvent, DeviceEvents};
use super::resources::{IndexBuffer, RenderTarget, Texture, VertexBuffer};
use super::types::{
    BlendMode, Canvas, ClearOptions, CompileStats, CullMode, DepthState, DeviceCapabilities,
    DeviceId, DeviceOptions, FrameStats, IndexFormat, Primitive, PrimitiveType, ProgramId, Rect,
    ResourceId, TextureDesc, VertexFormat,
};

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceStatus {
    Active,
    Lost,
    /// `destroy` is running; resources may still release native objects.
    Destroying,
    Destroyed,
}

/// Bound state mirrored on the CPU so redundant backend calls are skipped.
#[derive(Default)]
pub(crate) struct RenderState {
    pub(crate) target: Option<RenderTarget>,
    viewport: Rect,
    scissor: Rect,
    pipeline: PipelineState,
    shader: Option<Shader>,
    vertex_buffers: Vec<VertexBuffer>,
    index_buffer: Option<IndexBuffer>,
}

/// Objects every device keeps for its own use: fallback textures for unset
/// samplers and a full-screen quad.
pub struct DeviceResources {
    pub white: Texture,
    pub black: Texture,
    /// Four float3 positions covering clip space, drawn as a triangle strip.
    pub quad: VertexBuffer,
}

impl DeviceResources {
    fn create(device: &GraphicsDevice) -> Result<Self> {
        let white =
            device.create_texture(TextureDesc::new("default-white", 1, 1), Some(&[255; 4]))?;
        let black =
            device.create_texture(TextureDesc::new("default-black", 1, 1), Some(&[0, 0, 0, 255]))?;
        let positions: [[f32; 3]; 4] = [
            [-1.0, -1.0, 0.0],
            [1.0, -1.0, 0.0],
            [-1.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ];
        let quad = device.create_vertex_buffer(VertexFormat::position_only(), &positions)?;
        Ok(Self { white, black, quad })
    }
}

impl Destroy for DeviceResources {
    fn destroy(&self) {
        self.white.destroy();
        self.black.destroy();
        self.quad.destroy();
    }
}

impl DeviceCacheEntry for DeviceResources {}

pub(crate) struct DeviceInner {
    id: DeviceId,
    caps: DeviceCapabilities,
    pub(crate) scope: ScopeSpace,
    events: DeviceEvents,
    pub(crate) backend: RefCell<Box<dyn DeviceBackend>>,
    pub(crate) state: RefCell<RenderState>,
    programs: ProgramLibrary,
    chunks: RefCell<ChunkRegistry>,
    resources: DeviceCache<DeviceResources>,
    stats: Cell<FrameStats>,
    pub(crate) status: Cell<DeviceStatus>,
    canvas: Cell<Canvas>,
    next_resource: Cell<u64>,
}

/// A graphics device bound to one backend.
///
/// Clones are handles to the same device. All state is single-threaded.
#[derive(Clone)]
pub struct GraphicsDevice {
    inner: Rc<DeviceInner>,
}

impl GraphicsDevice {
    /// Wraps an already created backend.
    pub fn with_backend(
        backend: Box<dyn DeviceBackend>,
        canvas: Canvas,
        options: DeviceOptions,
    ) -> Self {
        let mut caps = backend.capabilities().clone();
        caps.clamp_bone_limit(options.bone_limit);
        let id = DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            device = %id,
            backend = %caps.backend,
            adapter = %caps.adapter_name,
            bones = caps.bone_limit,
            "graphics device created"
        );

        let inner = DeviceInner {
            id,
            caps,
            scope: ScopeSpace::new("Device"),
            events: DeviceEvents::default(),
            backend: RefCell::new(backend),
            state: RefCell::new(RenderState::default()),
            programs: ProgramLibrary::new(options.slow_compile_threshold),
            chunks: RefCell::new(ChunkRegistry::builtin()),
            resources: DeviceCache::new(),
            stats: Cell::new(FrameStats::default()),
            status: Cell::new(DeviceStatus::Active),
            canvas: Cell::new(canvas),
            next_resource: Cell::new(1),
        };
        let device = Self {
            inner: Rc::new(inner),
        };
        device.inner.backend.borrow_mut().resize(canvas.width, canvas.height);
        device.reset_view();
        device
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.inner.caps
    }

    pub fn events(&self) -> &DeviceEvents {
        &self.inner.events
    }

    /// Uniform namespace shared by every program on this device.
    pub fn scope(&self) -> &ScopeSpace {
        &self.inner.scope
    }

    pub fn chunks(&self) -> Ref<'_, ChunkRegistry> {
        self.inner.chunks.borrow()
    }

    pub fn canvas(&self) -> Canvas {
        self.inner.canvas.get()
    }

    pub fn bone_limit(&self) -> u32 {
        self.inner.caps.bone_limit
    }

    pub fn is_lost(&self) -> bool {
        self.inner.status.get() == DeviceStatus::Lost
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(
            self.inner.status.get(),
            DeviceStatus::Destroying | DeviceStatus::Destroyed
        )
    }

    pub fn ensure_usable(&self) -> Result<()> {
        match self.inner.status.get() {
            DeviceStatus::Active => Ok(()),
            DeviceStatus::Lost => Err(GraphicsError::DeviceLost),
            DeviceStatus::Destroying | DeviceStatus::Destroyed => {
                Err(GraphicsError::DeviceDestroyed)
            }
        }
    }

    pub(crate) fn compile_program(
        &self,
        id: ProgramId,
        shader: &ProcessedShader,
    ) -> Result<(), String> {
        self.inner.backend.borrow_mut().create_program(id, shader)
    }

    // ---- programs ----

    /// Returns the variant of family `G` for `options`, building it on first
    /// use. A variant that failed to build keeps failing with the same error.
    pub fn get_program<G: ShaderGenerator>(&self, options: &G::Options) -> Result<Shader> {
        self.inner.programs.get::<G>(self, options)
    }

    pub fn create_custom_shader(&self, desc: &CustomShaderDesc) -> Result<Shader> {
        self.inner.programs.create_custom(self, desc)
    }

    /// Drops `shader` from the library and frees its native program.
    pub fn destroy_shader(&self, shader: &Shader) {
        let linked = shader.is_ready();
        if !self.inner.programs.remove_from_cache(shader) {
            return;
        }
        {
            let mut state = self.inner.state.borrow_mut();
            if state.shader.as_ref().is_some_and(|bound| bound.ptr_eq(shader)) {
                state.shader = None;
            }
        }
        if linked && self.ensure_usable().is_ok() {
            self.inner.backend.borrow_mut().destroy_program(shader.id());
        }
    }

    pub fn recorded_variants(&self) -> Vec<VariantEntry> {
        self.inner.programs.recorded_variants()
    }

    /// Builds the variant a recorded entry names, dispatching on its family.
    pub fn program_for_entry(&self, entry: &VariantEntry) -> Result<Shader> {
        self.inner.programs.precompile_entry(self, entry)
    }

    pub fn precompile(&self, entries: &[VariantEntry]) -> PrecompileReport {
        self.inner.programs.precompile(self, entries)
    }

    pub fn program_count(&self) -> usize {
        self.inner.programs.len()
    }

    /// Replaces or adds a chunk. Every cached program is evicted since any
    /// of them may include it.
    pub fn set_chunk(&self, name: impl Into<String>, source: impl Into<String>) {
        self.inner.chunks.borrow_mut().set(name, source);
        self.evict_programs(self.ensure_usable().is_ok());
    }

    pub fn compile_stats(&self) -> CompileStats {
        self.inner.programs.stats()
    }

    fn evict_programs(&self, release_native: bool) {
        let linked = self.inner.programs.clear();
        self.inner.state.borrow_mut().shader = None;
        if release_native {
            let mut backend = self.inner.backend.borrow_mut();
            for shader in &linked {
                backend.destroy_program(shader.id());
            }
        }
    }

    // ---- resources ----

    fn next_resource_id(&self) -> ResourceId {
        let id = self.inner.next_resource.get();
        self.inner.next_resource.set(id + 1);
        ResourceId(id)
    }

    pub fn create_vertex_buffer<T: Pod>(
        &self,
        format: VertexFormat,
        vertices: &[T],
    ) -> Result<VertexBuffer> {
        self.ensure_usable()?;
        let data: &[u8] = bytemuck::cast_slice(vertices);
        let stride = format.stride() as usize;
        if stride == 0 || data.len() % stride != 0 {
            return Err(GraphicsError::InvalidResource(format!(
                "{} bytes of vertex data do not fill whole vertices of stride {stride}",
                data.len()
            )));
        }
        let id = self.next_resource_id();
        self.inner.backend.borrow_mut().create_vertex_buffer(id, &format, data)?;
        let count = (data.len() / stride) as u32;
        Ok(VertexBuffer::new(id, format, count, Rc::downgrade(&self.inner)))
    }

    pub fn create_index_buffer<T: Pod>(
        &self,
        format: IndexFormat,
        indices: &[T],
    ) -> Result<IndexBuffer> {
        self.ensure_usable()?;
        if std::mem::size_of::<T>() != format.size_bytes() as usize {
            return Err(GraphicsError::InvalidResource(format!(
                "index element of {} bytes does not match {format:?}",
                std::mem::size_of::<T>()
            )));
        }
        if format == IndexFormat::U8 && !self.inner.caps.supports_u8_indices {
            return Err(GraphicsError::InvalidResource(format!(
                "8-bit indices are not supported on {}",
                self.inner.caps.backend
            )));
        }
        let id = self.next_resource_id();
        let data: &[u8] = bytemuck::cast_slice(indices);
        self.inner.backend.borrow_mut().create_index_buffer(id, format, data)?;
        Ok(IndexBuffer::new(id, format, indices.len() as u32, Rc::downgrade(&self.inner)))
    }

    pub fn create_texture(&self, desc: TextureDesc, data: Option<&[u8]>) -> Result<Texture> {
        self.ensure_usable()?;
        let max = self.inner.caps.max_texture_size;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(GraphicsError::InvalidResource(format!(
                "texture '{}' is {}x{}; sizes must be within 1..={max}",
                desc.name, desc.width, desc.height
            )));
        }
        let id = self.next_resource_id();
        self.inner.backend.borrow_mut().create_texture(id, &desc, data)?;
        Ok(Texture::new(id, desc, Rc::downgrade(&self.inner)))
    }

    /// Creates a target rendering into `color`, which must be renderable.
    pub fn create_render_target(&self, color: &Texture, depth: bool) -> Result<RenderTarget> {
        self.ensure_usable()?;
        if !color.desc().renderable || color.is_destroyed() {
            return Err(GraphicsError::InvalidResource(format!(
                "texture '{}' cannot back a render target",
                color.name()
            )));
        }
        let id = self.next_resource_id();
        self.inner
            .backend
            .borrow_mut()
            .create_render_target(id, color.id(), depth)?;
        Ok(RenderTarget::new(id, color.clone(), depth, Rc::downgrade(&self.inner)))
    }

    /// Per-device default textures and quad, created on first use.
    pub fn resources(&self) -> Result<Rc<DeviceResources>> {
        self.inner.resources.get(self, DeviceResources::create)
    }

    // ---- render state ----

    /// Selects where subsequent draws go (`None` is the back buffer) and
    /// resets viewport and scissor to the full target.
    pub fn set_render_target(&self, target: Option<&RenderTarget>) {
        self.inner.state.borrow_mut().target = target.cloned();
        self.inner
            .backend
            .borrow_mut()
            .set_render_target(target.map(RenderTarget::id));
        self.reset_view();
    }

    pub fn render_target(&self) -> Option<RenderTarget> {
        self.inner.state.borrow().target.clone()
    }

    fn reset_view(&self) {
        let full = {
            let state = self.inner.state.borrow();
            match &state.target {
                Some(target) => Rect::full(target.width(), target.height()),
                None => {
                    let canvas = self.inner.canvas.get();
                    Rect::full(canvas.width, canvas.height)
                }
            }
        };
        {
            let mut state = self.inner.state.borrow_mut();
            state.viewport = full;
            state.scissor = full;
        }
        let mut backend = self.inner.backend.borrow_mut();
        backend.set_viewport(full);
        backend.set_scissor(full);
    }

    pub fn viewport(&self) -> Rect {
        self.inner.state.borrow().viewport
    }

    pub fn scissor(&self) -> Rect {
        self.inner.state.borrow().scissor
    }

    pub fn set_viewport(&self, rect: Rect) {
        if std::mem::replace(&mut self.inner.state.borrow_mut().viewport, rect) != rect {
            self.inner.backend.borrow_mut().set_viewport(rect);
        }
    }

    pub fn set_scissor(&self, rect: Rect) {
        if std::mem::replace(&mut self.inner.state.borrow_mut().scissor, rect) != rect {
            self.inner.backend.borrow_mut().set_scissor(rect);
        }
    }

    pub fn set_blend_state(&self, blend: BlendMode) {
        self.inner.state.borrow_mut().pipeline.blend = blend;
    }

    pub fn set_depth_state(&self, depth: DepthState) {
        self.inner.state.borrow_mut().pipeline.depth = depth;
    }

    pub fn set_cull_mode(&self, cull: CullMode) {
        self.inner.state.borrow_mut().pipeline.cull = cull;
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.inner.state.borrow().pipeline
    }

    pub fn set_shader(&self, shader: &Shader) {
        let mut state = self.inner.state.borrow_mut();
        if state.shader.as_ref().is_some_and(|bound| bound.ptr_eq(shader)) {
            return;
        }
        state.shader = Some(shader.clone());
        drop(state);
        self.update_stats(|stats| stats.shader_switches += 1);
    }

    /// Binds `buffers` as the vertex streams for subsequent draws.
    pub fn set_vertex_buffers(&self, buffers: &[&VertexBuffer]) {
        self.inner.state.borrow_mut().vertex_buffers = buffers.iter().map(|&b| b.clone()).collect();
    }

    pub fn set_vertex_buffer(&self, buffer: &VertexBuffer) {
        self.set_vertex_buffers(&[buffer]);
    }

    pub fn set_index_buffer(&self, buffer: Option<&IndexBuffer>) {
        self.inner.state.borrow_mut().index_buffer = buffer.cloned();
    }

    // ---- drawing ----

    pub fn clear(&self, options: &ClearOptions) -> Result<()> {
        self.ensure_usable()?;
        self.inner.backend.borrow_mut().clear(options)
    }

    /// Draws `primitive` with the bound shader and buffers. Only uniforms
    /// whose value changed since the shader's previous draw are uploaded.
    pub fn draw(&self, primitive: Primitive, instances: u32) -> Result<()> {
        self.ensure_usable()?;
        let Some(prepared) = self.prepare_draw()? else {
            return Ok(());
        };
        let call = prepared.call(primitive, instances.max(1));
        self.inner.backend.borrow_mut().draw(&call.as_call())?;
        prepared.commit();

        let submitted = u64::from(primitive.count) * u64::from(instances.max(1));
        self.update_stats(|stats| {
            stats.draw_calls += 1;
            stats.uniform_uploads += prepared.uniforms.uploads.len() as u64;
            stats.primitives += submitted;
            stats.primitives_by_type[primitive.kind.index()] += submitted;
        });
        Ok(())
    }

    /// Submits every sub-draw of `commands`. Backends without multi-draw
    /// support get one draw per sub-draw.
    pub fn multi_draw(&self, kind: PrimitiveType, commands: &DrawCommands) -> Result<()> {
        self.ensure_usable()?;
        if commands.count() == 0 {
            return Ok(());
        }
        let Some(prepared) = self.prepare_draw()? else {
            return Ok(());
        };
        let indexed = commands.is_indexed();

        if self.inner.caps.supports_multi_draw {
            let call = prepared.call(
                Primitive {
                    kind,
                    base: 0,
                    count: 0,
                    indexed,
                },
                1,
            );
            self.inner
                .backend
                .borrow_mut()
                .multi_draw(&call.as_call(), commands)?;
            prepared.commit();
            self.update_stats(|stats| stats.multi_draw_calls += 1);
        } else {
            let mut backend = self.inner.backend.borrow_mut();
            for (i, (count, first, instances)) in commands.iter().enumerate() {
                let mut call = prepared.call(
                    Primitive {
                        kind,
                        base: first,
                        count,
                        indexed,
                    },
                    instances,
                );
                // Uniforms only need to reach the backend once per batch.
                if i > 0 {
                    call.uniforms = &[];
                }
                backend.draw(&call.as_call())?;
                if i == 0 {
                    prepared.commit();
                }
            }
            drop(backend);
            self.update_stats(|stats| stats.draw_calls += commands.count() as u64);
        }

        let submitted: u64 = commands
            .iter()
            .map(|(count, _, instances)| u64::from(count) * u64::from(instances))
            .sum();
        self.update_stats(|stats| {
            stats.sub_draws += commands.count() as u64;
            stats.uniform_uploads += prepared.uniforms.uploads.len() as u64;
            stats.primitives += submitted;
            stats.primitives_by_type[kind.index()] += submitted;
        });
        Ok(())
    }

    /// Resolves everything a draw needs from the bound state. `None` means
    /// the bound shader cannot be drawn with and the draw is skipped.
    fn prepare_draw(&self) -> Result<Option<PreparedDraw>> {
        let (shader, vertex_buffers, index_buffer, pipeline) = {
            let state = self.inner.state.borrow();
            let shader = state.shader.clone().ok_or_else(|| {
                GraphicsError::InvalidResource("draw without a bound shader".into())
            })?;
            (
                shader,
                state.vertex_buffers.clone(),
                state.index_buffer.clone(),
                state.pipeline,
            )
        };
        if !shader.is_ready() {
            tracing::trace!(shader = %shader.name(), state = ?shader.state(), "skipping draw");
            return Ok(None);
        }
        if let Some(dead) = vertex_buffers.iter().find(|buffer| buffer.is_destroyed()) {
            return Err(GraphicsError::InvalidResource(format!(
                "vertex buffer {} was destroyed",
                dead.id().0
            )));
        }
        if index_buffer.as_ref().is_some_and(IndexBuffer::is_destroyed) {
            return Err(GraphicsError::InvalidResource("index buffer was destroyed".into()));
        }

        let textures = self.bind_samplers(&shader)?;
        let uniforms = shader.pending_uniforms();
        Ok(Some(PreparedDraw {
            shader,
            vertex_buffers,
            index_buffer,
            uniforms,
            textures,
            pipeline,
        }))
    }

    /// Texture for every sampler of `shader`; unset or destroyed ones fall
    /// back to the default white texture.
    fn bind_samplers(&self, shader: &Shader) -> Result<Vec<TextureBinding>> {
        let Some(processed) = shader.processed() else {
            return Ok(Vec::new());
        };
        let mut bindings = Vec::with_capacity(processed.samplers.len());
        let samplers = processed.samplers.iter().zip(shader.sampler_ids());
        for (index, (sampler, id)) in samplers.enumerate() {
            let bound = match id.value() {
                Some(UniformValue::Texture(texture)) if !texture.is_destroyed() => {
                    Some(texture.id())
                }
                _ => None,
            };
            let texture = match bound {
                Some(texture) => texture,
                None => {
                    if shader.first_unset_sampler_warning(index) {
                        tracing::warn!(
                            shader = %shader.name(),
                            sampler = %sampler.name,
                            "sampler has no texture; using the default texture"
                        );
                    }
                    self.update_stats(|stats| stats.texture_fallbacks += 1);
                    self.resources()?.white.id()
                }
            };
            bindings.push(TextureBinding {
                slot: sampler.slot,
                texture,
            });
        }
        Ok(bindings)
    }

    pub fn submit(&self) -> Result<()> {
        self.ensure_usable()?;
        self.inner.backend.borrow_mut().submit()
    }

    /// Reads `texture` back as tightly packed RGBA8 rows. The future resolves
    /// once the copy lands and never blocks the thread while waiting.
    pub async fn read_texture(&self, texture: &Texture) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        if texture.is_destroyed() {
            return Err(GraphicsError::InvalidResource(format!(
                "texture '{}' was destroyed",
                texture.name()
            )));
        }
        let mut readback = self.inner.backend.borrow_mut().read_texture(texture.id())?;
        std::future::poll_fn(|cx| match readback.poll() {
            Some(result) => Poll::Ready(result),
            None => {
                // The copy advances on every poll; yield and come back.
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        })
        .await
    }

    /// Resizes the back buffer and fires [`DeviceEvent::Resize`].
    pub fn resize_canvas(&self, width: u32, height: u32) {
        if self.is_destroyed() {
            return;
        }
        let canvas = Canvas::new(width.max(1), height.max(1));
        if canvas == self.inner.canvas.get() {
            return;
        }
        self.inner.canvas.set(canvas);
        self.inner.backend.borrow_mut().resize(canvas.width, canvas.height);
        if self.inner.state.borrow().target.is_none() {
            self.reset_view();
        }
        self.inner.events.fire(DeviceEvent::Resize {
            width: canvas.width,
            height: canvas.height,
        });
    }

    pub fn stats(&self) -> FrameStats {
        self.inner.stats.get()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.set(FrameStats::default());
    }

    fn update_stats(&self, update: impl FnOnce(&mut FrameStats)) {
        let mut stats = self.inner.stats.get();
        update(&mut stats);
        self.inner.stats.set(stats);
    }

    // ---- lifecycle ----

    /// Tears the device down. Listeners of [`DeviceEvent::Destroy`] run
    /// first while resources can still be released. Calling it again does
    /// nothing.
    pub fn destroy(&self) {
        match self.inner.status.get() {
            DeviceStatus::Destroying | DeviceStatus::Destroyed => return,
            DeviceStatus::Active | DeviceStatus::Lost => {}
        }
        let was_lost = self.is_lost();
        self.inner.status.set(DeviceStatus::Destroying);
        tracing::debug!(device = %self.inner.id, "destroying graphics device");

        self.inner.events.fire(DeviceEvent::Destroy);
        self.evict_programs(!was_lost);
        *self.inner.state.borrow_mut() = RenderState::default();
        self.inner.backend.borrow_mut().destroy();

        self.inner.status.set(DeviceStatus::Destroyed);
        self.inner.events.clear();
    }

    /// Marks the native context lost. Programs are evicted and every further
    /// operation fails with [`GraphicsError::DeviceLost`].
    pub fn handle_device_lost(&self) {
        if self.inner.status.get() != DeviceStatus::Active {
            return;
        }
        self.inner.status.set(DeviceStatus::Lost);
        tracing::warn!(device = %self.inner.id, "graphics device lost");

        self.inner.events.fire(DeviceEvent::Lost);
        self.evict_programs(false);
        self.inner.backend.borrow_mut().lose();
    }
}

impl fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("id", &self.inner.id)
            .field("backend", &self.inner.caps.backend)
            .field("status", &self.inner.status.get())
            .field("programs", &self.inner.programs.len())
            .finish()
    }
}

struct PreparedDraw {
    shader: Shader,
    vertex_buffers: Vec<VertexBuffer>,
    index_buffer: Option<IndexBuffer>,
    uniforms: PendingUniforms,
    textures: Vec<TextureBinding>,
    pipeline: PipelineState,
}

impl PreparedDraw {
    fn bindings(&self) -> Vec<VertexBinding<'_>> {
        self.vertex_buffers
            .iter()
            .map(|buffer| VertexBinding {
                buffer: buffer.id(),
                format: buffer.format(),
            })
            .collect()
    }

    fn call<'a>(&'a self, primitive: Primitive, instances: u32) -> DrawParts<'a> {
        DrawParts {
            prepared: self,
            bindings: self.bindings(),
            primitive,
            instances,
            uniforms: &self.uniforms.uploads,
        }
    }

    /// Called once the backend accepted the uploads.
    fn commit(&self) {
        self.shader.commit_uniforms(&self.uniforms);
    }
}

/// Owns the vertex bindings a [`DrawCall`] borrows.
struct DrawParts<'a> {
    prepared: &'a PreparedDraw,
    bindings: Vec<VertexBinding<'a>>,
    primitive: Primitive,
    instances: u32,
    uniforms: &'a [UniformUpload],
}

impl DrawParts<'_> {
    fn as_call(&self) -> DrawCall<'_> {
        DrawCall {
            program: self.prepared.shader.id(),
            primitive: self.primitive,
            instances: self.instances,
            vertex_buffers: &self.bindings,
            index_buffer: self
                .prepared
                .index_buffer
                .as_ref()
                .map(|buffer| (buffer.id(), buffer.format())),
            uniforms: self.uniforms,
            textures: &self.prepared.textures,
            state: self.prepared.pipeline,
        }
    }
}
