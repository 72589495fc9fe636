use std::borrow::Cow;
use std::collections::HashMap;

use crate::device::PipelineState;
use crate::shader::ProcessedShader;

use super::super::types::{
    BlendMode, CullMode, IndexFormat, PrimitiveType, ProgramId, VertexDataType, VertexFormat,
};
use super::context::GpuContext;
use super::uniforms::UniformStaging;

pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// Shader modules and bind group layouts of one linked program.
pub(crate) struct ProgramObjects {
    pub vertex_module: wgpu::ShaderModule,
    pub fragment_module: wgpu::ShaderModule,
    pub uniform_layout: wgpu::BindGroupLayout,
    pub texture_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub uniforms: UniformStaging,
    /// Sampler slots in binding order.
    pub sampler_slots: Vec<u32>,
}

impl ProgramObjects {
    pub fn new(context: &GpuContext, shader: &ProcessedShader) -> Result<Self, String> {
        let (vertex_module, fragment_module) = context.validated(|device| {
            let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} vertex", shader.name)),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Borrowed(&shader.vertex_source),
                    stage: wgpu::naga::ShaderStage::Vertex,
                    defines: &[],
                },
            });
            let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&format!("{} fragment", shader.name)),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Borrowed(&shader.fragment_source),
                    stage: wgpu::naga::ShaderStage::Fragment,
                    defines: &[],
                },
            });
            (vertex, fragment)
        })?;

        let device = &context.device;
        let uniforms = UniformStaging::new(shader.uniforms.clone());
        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = if uniforms.is_empty() {
            Vec::new()
        } else {
            vec![wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }]
        };
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &uniform_entries,
        });

        let sampler_slots: Vec<u32> = shader.samplers.iter().map(|sampler| sampler.slot).collect();
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &build_texture_layout_entries(&sampler_slots),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} layout", shader.name)),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            vertex_module,
            fragment_module,
            uniform_layout,
            texture_layout,
            pipeline_layout,
            uniforms,
            sampler_slots,
        })
    }
}

/// Everything a render pipeline is specialised on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: ProgramId,
    pub vertex_formats: Vec<VertexFormat>,
    pub topology: PrimitiveType,
    pub strip_index: Option<IndexFormat>,
    pub state: PipelineState,
    pub color_format: wgpu::TextureFormat,
    pub depth: bool,
}

#[derive(Default)]
pub(crate) struct PipelineCache {
    entries: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn get_or_create(
        &mut self,
        context: &GpuContext,
        program: &ProgramObjects,
        key: PipelineKey,
    ) -> Result<wgpu::RenderPipeline, String> {
        if let Some(pipeline) = self.entries.get(&key) {
            return Ok(pipeline.clone());
        }
        let pipeline = create_pipeline(context, program, &key)?;
        tracing::debug!(
            program = key.program.0,
            topology = ?key.topology,
            "created render pipeline"
        );
        self.entries.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Drops every pipeline built for `program`.
    pub fn forget_program(&mut self, program: ProgramId) {
        self.entries.retain(|key, _| key.program != program);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn create_pipeline(
    context: &GpuContext,
    program: &ProgramObjects,
    key: &PipelineKey,
) -> Result<wgpu::RenderPipeline, String> {
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = key
        .vertex_formats
        .iter()
        .map(vertex_attributes)
        .collect::<Result<_, _>>()?;
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .vertex_formats
        .iter()
        .zip(&attributes)
        .map(|(format, attributes)| wgpu::VertexBufferLayout {
            array_stride: u64::from(format.stride()),
            step_mode: if format.is_instancing() {
                wgpu::VertexStepMode::Instance
            } else {
                wgpu::VertexStepMode::Vertex
            },
            attributes,
        })
        .collect();

    let depth_stencil = key.depth.then(|| wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: key.state.depth.write,
        depth_compare: if key.state.depth.test {
            wgpu::CompareFunction::LessEqual
        } else {
            wgpu::CompareFunction::Always
        },
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    context.validated(|device| {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("program pipeline"),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.vertex_module,
                entry_point: Some("main"),
                buffers: &buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: topology(key.topology),
                strip_index_format: key.strip_index.and_then(index_format),
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: match key.state.cull {
                    CullMode::None => None,
                    CullMode::Back => Some(wgpu::Face::Back),
                    CullMode::Front => Some(wgpu::Face::Front),
                },
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &program.fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color_format,
                    blend: blend_state(key.state.blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        })
    })
}

fn vertex_attributes(format: &VertexFormat) -> Result<Vec<wgpu::VertexAttribute>, String> {
    format
        .elements()
        .iter()
        .map(|element| {
            let vertex_format = match (element.data_type, element.components) {
                (VertexDataType::Float32, 1) => wgpu::VertexFormat::Float32,
                (VertexDataType::Float32, 2) => wgpu::VertexFormat::Float32x2,
                (VertexDataType::Float32, 3) => wgpu::VertexFormat::Float32x3,
                (VertexDataType::Float32, 4) => wgpu::VertexFormat::Float32x4,
                (VertexDataType::Uint8, 2) => wgpu::VertexFormat::Uint8x2,
                (VertexDataType::Uint8, 4) => wgpu::VertexFormat::Uint8x4,
                (VertexDataType::Uint8Normalized, 2) => wgpu::VertexFormat::Unorm8x2,
                (VertexDataType::Uint8Normalized, 4) => wgpu::VertexFormat::Unorm8x4,
                (data_type, components) => {
                    return Err(format!(
                        "{:?} has no vertex format for {components} x {data_type:?}",
                        element.semantic
                    ))
                }
            };
            Ok(wgpu::VertexAttribute {
                format: vertex_format,
                offset: u64::from(element.offset),
                shader_location: element.semantic.location(),
            })
        })
        .collect()
}

fn topology(kind: PrimitiveType) -> wgpu::PrimitiveTopology {
    match kind {
        PrimitiveType::Points => wgpu::PrimitiveTopology::PointList,
        PrimitiveType::Lines => wgpu::PrimitiveTopology::LineList,
        PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveType::Triangles => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

pub(crate) fn index_format(format: IndexFormat) -> Option<wgpu::IndexFormat> {
    match format {
        IndexFormat::U8 => None,
        IndexFormat::U16 => Some(wgpu::IndexFormat::Uint16),
        IndexFormat::U32 => Some(wgpu::IndexFormat::Uint32),
    }
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    match mode {
        BlendMode::None => None,
        BlendMode::Normal => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Premultiplied => Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: component(wgpu::BlendFactor::SrcAlpha, wgpu::BlendFactor::One),
            alpha: component(wgpu::BlendFactor::One, wgpu::BlendFactor::One),
        }),
    }
}

/// Texture at binding `2 * slot`, sampler at `2 * slot + 1`.
pub(crate) fn build_texture_layout_entries(slots: &[u32]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(slots.len() * 2);
    for &slot in slots {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

pub(crate) fn build_texture_entries<'a>(
    bound: &'a [(u32, &'a wgpu::TextureView)],
    sampler: &'a wgpu::Sampler,
) -> Vec<wgpu::BindGroupEntry<'a>> {
    let mut entries = Vec::with_capacity(bound.len() * 2);
    for &(slot, view) in bound {
        entries.push(wgpu::BindGroupEntry {
            binding: slot * 2,
            resource: wgpu::BindingResource::TextureView(view),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: slot * 2 + 1,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
    }
    entries
}
