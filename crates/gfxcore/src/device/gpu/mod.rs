//! `wgpu` backends: WebGPU on the explicit APIs and WebGL2 on the GL backend.
//!
//! Rendering is headless; the back buffer is an offscreen texture sized to
//! the canvas. Each draw records its own render pass into a frame encoder
//! that `submit` hands to the queue.

mod context;
mod pipeline;
mod uniforms;

use std::collections::HashMap;

use crate::draw_commands::DrawCommands;
use crate::error::{GraphicsError, Result};
use crate::shader::ProcessedShader;

use super::backend::{DeviceBackend, DrawCall, Readback};
use super::types::{
    BackendKind, Canvas, ClearOptions, DeviceCapabilities, DeviceOptions, IndexFormat,
    PrimitiveType, ProgramId, Rect, ResourceId, ShaderTarget, TextureDesc, TextureFormat,
    VertexFormat, DEFAULT_BONE_LIMIT,
};

use context::GpuContext;
use pipeline::{
    build_texture_entries, index_format, PipelineCache, PipelineKey, ProgramObjects, DEPTH_FORMAT,
};

const BACK_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Copy into a mappable buffer; completes once the map callback fires.
struct GpuReadback {
    device: wgpu::Device,
    buffer: wgpu::Buffer,
    receiver: crossbeam_channel::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
    row_bytes: u32,
    padded_row: u32,
}

impl GpuReadback {
    fn unpack(&self) -> Vec<u8> {
        let slice = self.buffer.slice(..);
        let mapped = slice.get_mapped_range();
        let rows = mapped.len() / self.padded_row as usize;
        let mut pixels = Vec::with_capacity(rows * self.row_bytes as usize);
        for row in mapped.chunks_exact(self.padded_row as usize) {
            pixels.extend_from_slice(&row[..self.row_bytes as usize]);
        }
        drop(mapped);
        self.buffer.unmap();
        pixels
    }
}

impl Readback for GpuReadback {
    fn poll(&mut self) -> Option<Result<Vec<u8>>> {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            return Some(Err(GraphicsError::Backend(format!("readback poll failed: {err}"))));
        }
        match self.receiver.try_recv() {
            Ok(Ok(())) => Some(Ok(self.unpack())),
            Ok(Err(err)) => Some(Err(GraphicsError::Backend(format!(
                "readback mapping failed: {err}"
            )))),
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => Some(Err(
                GraphicsError::Backend("readback callback dropped".to_string()),
            )),
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

impl GpuTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
            width,
            height,
        }
    }

    fn depth(device: &wgpu::Device, width: u32, height: u32) -> Self {
        Self::new(
            device,
            "depth",
            width,
            height,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
        )
    }
}

enum GpuResource {
    VertexBuffer(wgpu::Buffer),
    IndexBuffer(wgpu::Buffer, wgpu::IndexFormat),
    Texture(GpuTexture),
    RenderTarget {
        color: ResourceId,
        depth: Option<GpuTexture>,
    },
}

/// Color and depth views a pass renders into.
struct Attachments {
    color: wgpu::TextureView,
    color_format: wgpu::TextureFormat,
    depth: Option<wgpu::TextureView>,
    width: u32,
    height: u32,
}

pub struct WgpuBackend {
    kind: BackendKind,
    caps: DeviceCapabilities,
    context: Option<GpuContext>,
    programs: HashMap<ProgramId, ProgramObjects>,
    pipelines: PipelineCache,
    resources: HashMap<ResourceId, GpuResource>,
    back_buffer: Option<(GpuTexture, GpuTexture)>,
    sampler: Option<wgpu::Sampler>,
    encoder: Option<wgpu::CommandEncoder>,
    target: Option<ResourceId>,
    viewport: Rect,
    scissor: Rect,
}

impl WgpuBackend {
    pub async fn new(kind: BackendKind, canvas: Canvas, options: &DeviceOptions) -> Result<Self> {
        let context = GpuContext::new(
            kind,
            options.power_preference,
            options.fail_if_major_performance_caveat,
        )
        .await?;
        let limits = &context.limits;
        let caps = DeviceCapabilities {
            backend: kind,
            shader_target: ShaderTarget::Glsl450,
            supports_multi_draw: true,
            supports_u8_indices: false,
            max_texture_size: limits.max_texture_dimension_2d,
            max_uniform_block_size: limits.max_uniform_buffer_binding_size,
            bone_limit: DEFAULT_BONE_LIMIT.max(options.bone_limit),
            adapter_name: context.adapter_profile.name.clone(),
        };
        let sampler = context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("default sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let mut backend = Self {
            kind,
            caps,
            context: Some(context),
            programs: HashMap::new(),
            pipelines: PipelineCache::default(),
            resources: HashMap::new(),
            back_buffer: None,
            sampler: Some(sampler),
            encoder: None,
            target: None,
            viewport: Rect::full(canvas.width, canvas.height),
            scissor: Rect::full(canvas.width, canvas.height),
        };
        backend.resize(canvas.width, canvas.height);
        Ok(backend)
    }

    fn context(&self) -> Result<&GpuContext> {
        self.context.as_ref().ok_or(GraphicsError::DeviceLost)
    }

    fn encoder(&mut self) -> Result<&mut wgpu::CommandEncoder> {
        if self.encoder.is_none() {
            let encoder = self
                .context()?
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame encoder"),
                });
            self.encoder = Some(encoder);
        }
        self.encoder.as_mut().ok_or(GraphicsError::DeviceLost)
    }

    fn attachments(&self) -> Result<Attachments> {
        match self.target {
            None => {
                let (color, depth) = self
                    .back_buffer
                    .as_ref()
                    .ok_or(GraphicsError::DeviceLost)?;
                Ok(Attachments {
                    color: color.view.clone(),
                    color_format: color.format,
                    depth: Some(depth.view.clone()),
                    width: color.width,
                    height: color.height,
                })
            }
            Some(id) => {
                let Some(GpuResource::RenderTarget { color, depth }) = self.resources.get(&id)
                else {
                    return Err(GraphicsError::InvalidResource(format!(
                        "render target {} is not alive",
                        id.0
                    )));
                };
                let Some(GpuResource::Texture(color)) = self.resources.get(color) else {
                    return Err(GraphicsError::InvalidResource(format!(
                        "color texture of render target {} is gone",
                        id.0
                    )));
                };
                Ok(Attachments {
                    color: color.view.clone(),
                    color_format: color.format,
                    depth: depth.as_ref().map(|depth| depth.view.clone()),
                    width: color.width,
                    height: color.height,
                })
            }
        }
    }

    /// Resolves pipeline, bind groups and buffers, then records a pass
    /// issuing `draws` as `(count, first, instances)` triples.
    fn encode(&mut self, call: &DrawCall<'_>, draws: &[(u32, u32, u32)]) -> Result<()> {
        let attachments = self.attachments()?;
        let context = self.context.as_ref().ok_or(GraphicsError::DeviceLost)?;
        let program = self.programs.get_mut(&call.program).ok_or_else(|| {
            GraphicsError::Backend(format!("program {} is not linked", call.program.0))
        })?;
        program.uniforms.apply(call.uniforms).map_err(GraphicsError::Backend)?;

        let key = PipelineKey {
            program: call.program,
            vertex_formats: call
                .vertex_buffers
                .iter()
                .map(|binding| binding.format.clone())
                .collect(),
            topology: call.primitive.kind,
            strip_index: call
                .index_buffer
                .map(|(_, format)| format)
                .filter(|_| {
                    matches!(
                        call.primitive.kind,
                        PrimitiveType::LineStrip | PrimitiveType::TriangleStrip
                    )
                }),
            state: call.state,
            color_format: attachments.color_format,
            depth: attachments.depth.is_some(),
        };
        let pipeline = self
            .pipelines
            .get_or_create(context, program, key)
            .map_err(GraphicsError::Backend)?;

        let device = &context.device;
        let uniform_buffer =
            (!program.uniforms.is_empty()).then(|| program.uniforms.snapshot(device));
        let uniform_entries: Vec<wgpu::BindGroupEntry<'_>> = uniform_buffer
            .iter()
            .map(|buffer| wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform bind group"),
            layout: &program.uniform_layout,
            entries: &uniform_entries,
        });

        let mut views = Vec::with_capacity(call.textures.len());
        for binding in call.textures {
            match self.resources.get(&binding.texture) {
                Some(GpuResource::Texture(texture)) => views.push((binding.slot, &texture.view)),
                _ => {
                    return Err(GraphicsError::InvalidResource(format!(
                        "texture {} is not alive",
                        binding.texture.0
                    )))
                }
            }
        }
        let sampler = self.sampler.as_ref().ok_or(GraphicsError::DeviceLost)?;
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture bind group"),
            layout: &program.texture_layout,
            entries: &build_texture_entries(&views, sampler),
        });

        let mut vertex_buffers = Vec::with_capacity(call.vertex_buffers.len());
        for binding in call.vertex_buffers {
            match self.resources.get(&binding.buffer) {
                Some(GpuResource::VertexBuffer(buffer)) => vertex_buffers.push(buffer.clone()),
                _ => {
                    return Err(GraphicsError::InvalidResource(format!(
                        "vertex buffer {} is not alive",
                        binding.buffer.0
                    )))
                }
            }
        }
        let index_buffer = match call.index_buffer {
            Some((id, _)) if call.primitive.indexed => match self.resources.get(&id) {
                Some(GpuResource::IndexBuffer(buffer, format)) => Some((buffer.clone(), *format)),
                _ => {
                    return Err(GraphicsError::InvalidResource(format!(
                        "index buffer {} is not alive",
                        id.0
                    )))
                }
            },
            _ if call.primitive.indexed => {
                return Err(GraphicsError::InvalidResource(
                    "indexed draw without an index buffer".to_string(),
                ))
            }
            _ => None,
        };

        let viewport = clamp_rect(self.viewport, attachments.width, attachments.height);
        let scissor = clamp_rect(self.scissor, attachments.width, attachments.height);
        if viewport.is_empty() || scissor.is_empty() {
            tracing::trace!(?viewport, ?scissor, "draw covers no pixels; skipped");
            return Ok(());
        }
        let encoder = self.encoder()?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &attachments.color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: attachments.depth.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        pass.set_scissor_rect(scissor.x, scissor.y, scissor.width, scissor.height);
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &uniform_group, &[]);
        pass.set_bind_group(1, &texture_group, &[]);
        for (slot, buffer) in vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        if let Some((buffer, format)) = &index_buffer {
            pass.set_index_buffer(buffer.slice(..), *format);
        }
        for &(count, first, instances) in draws {
            if index_buffer.is_some() {
                pass.draw_indexed(first..first + count, 0, 0..instances);
            } else {
                pass.draw(first..first + count, 0..instances);
            }
        }
        Ok(())
    }
}

fn clamp_rect(rect: Rect, width: u32, height: u32) -> Rect {
    let x = rect.x.min(width);
    let y = rect.y.min(height);
    Rect::new(x, y, rect.width.min(width - x), rect.height.min(height - y))
}

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
    }
}

impl DeviceBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn create_program(&mut self, id: ProgramId, shader: &ProcessedShader) -> Result<(), String> {
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| "graphics device was lost".to_string())?;
        let objects = ProgramObjects::new(context, shader)?;
        tracing::debug!(program = id.0, name = %shader.name, "linked program");
        self.programs.insert(id, objects);
        Ok(())
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
        self.pipelines.forget_program(id);
    }

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        _format: &VertexFormat,
        data: &[u8],
    ) -> Result<()> {
        use wgpu::util::DeviceExt;
        let buffer = self
            .context()?
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertex buffer"),
                contents: data,
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.resources.insert(id, GpuResource::VertexBuffer(buffer));
        Ok(())
    }

    fn create_index_buffer(
        &mut self,
        id: ResourceId,
        format: IndexFormat,
        data: &[u8],
    ) -> Result<()> {
        use wgpu::util::DeviceExt;
        let native = index_format(format).ok_or_else(|| {
            GraphicsError::InvalidResource(format!(
                "{format:?} indices are not supported on {}",
                self.kind
            ))
        })?;
        // Buffer sizes must be a multiple of 4 bytes.
        let mut contents = data.to_vec();
        contents.resize(data.len().next_multiple_of(4), 0);
        let buffer = self
            .context()?
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("index buffer"),
                contents: &contents,
                usage: wgpu::BufferUsages::INDEX,
            });
        self.resources.insert(id, GpuResource::IndexBuffer(buffer, native));
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: ResourceId,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let context = self.context()?;
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if desc.renderable {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = GpuTexture::new(
            &context.device,
            &desc.name,
            desc.width,
            desc.height,
            texture_format(desc.format),
            usage,
        );
        if let Some(data) = data {
            if data.len() != desc.byte_len() {
                return Err(GraphicsError::InvalidResource(format!(
                    "texture '{}' expects {} bytes, got {}",
                    desc.name,
                    desc.byte_len(),
                    data.len()
                )));
            }
            context.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                    rows_per_image: Some(desc.height),
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.resources.insert(id, GpuResource::Texture(texture));
        Ok(())
    }

    fn create_render_target(
        &mut self,
        id: ResourceId,
        color: ResourceId,
        depth: bool,
    ) -> Result<()> {
        let (width, height) = match self.resources.get(&color) {
            Some(GpuResource::Texture(texture)) => (texture.width, texture.height),
            _ => {
                return Err(GraphicsError::InvalidResource(format!(
                    "texture {} is not alive",
                    color.0
                )))
            }
        };
        let depth = if depth {
            Some(GpuTexture::depth(&self.context()?.device, width, height))
        } else {
            None
        };
        self.resources.insert(id, GpuResource::RenderTarget { color, depth });
        Ok(())
    }

    fn destroy_resource(&mut self, id: ResourceId) {
        if let Some(GpuResource::Texture(texture)) = self.resources.remove(&id) {
            texture.texture.destroy();
        }
        if self.target == Some(id) {
            self.target = None;
        }
    }

    fn set_render_target(&mut self, target: Option<ResourceId>) {
        self.target = target;
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.viewport = rect;
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.scissor = rect;
    }

    fn clear(&mut self, options: &ClearOptions) -> Result<()> {
        let attachments = self.attachments()?;
        let encoder = self.encoder()?;
        let color_load = match options.color {
            Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = match options.depth {
            Some(depth) => wgpu::LoadOp::Clear(depth),
            None => wgpu::LoadOp::Load,
        };
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &attachments.color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: attachments.depth.as_ref().map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        let draw = (call.primitive.count, call.primitive.base, call.instances);
        self.encode(call, &[draw])
    }

    fn multi_draw(&mut self, call: &DrawCall<'_>, commands: &DrawCommands) -> Result<()> {
        let draws: Vec<(u32, u32, u32)> = commands.iter().collect();
        self.encode(call, &draws)
    }

    fn submit(&mut self) -> Result<()> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        let context = self.context()?;
        context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn read_texture(&mut self, id: ResourceId) -> Result<Box<dyn Readback>> {
        self.submit()?;
        let context = self.context()?;
        let Some(GpuResource::Texture(texture)) = self.resources.get(&id) else {
            return Err(GraphicsError::InvalidResource(format!(
                "texture {} is not alive",
                id.0
            )));
        };

        let row_bytes = texture.width * 4;
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: u64::from(padded_row) * u64::from(texture.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(texture.height),
                },
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        context.queue.submit(Some(encoder.finish()));

        let (sender, receiver) = crossbeam_channel::bounded(1);
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        Ok(Box::new(GpuReadback {
            device: context.device.clone(),
            buffer,
            receiver,
            row_bytes,
            padded_row,
        }))
    }

    fn resize(&mut self, width: u32, height: u32) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        let (width, height) = (width.max(1), height.max(1));
        let color = GpuTexture::new(
            &context.device,
            "back buffer",
            width,
            height,
            BACK_BUFFER_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let depth = GpuTexture::depth(&context.device, width, height);
        self.back_buffer = Some((color, depth));
    }

    fn lose(&mut self) {
        self.encoder = None;
        self.programs.clear();
        self.pipelines.clear();
        self.resources.clear();
        self.back_buffer = None;
        self.sampler = None;
        self.context = None;
    }

    fn destroy(&mut self) {
        let context = self.context.take();
        self.lose();
        if let Some(context) = context {
            context.device.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rects_clamp_to_the_attachment() {
        assert_eq!(clamp_rect(Rect::new(8, 8, 64, 64), 32, 16), Rect::new(8, 8, 24, 8));
        assert_eq!(clamp_rect(Rect::full(32, 16), 32, 16), Rect::full(32, 16));

        let outside = clamp_rect(Rect::new(40, 0, 10, 10), 32, 16);
        assert_eq!(outside, Rect::new(32, 0, 0, 10));
        assert!(outside.is_empty());
        assert!(clamp_rect(Rect::new(0, 16, 4, 4), 32, 16).is_empty());
    }
}
