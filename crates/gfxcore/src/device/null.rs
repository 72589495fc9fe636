//! Backend without a GPU.
//!
//! Every call is validated against the objects the backend knows about and
//! appended to a shared [`CallLog`], which makes it the backend tests and
//! headless tooling run against. Texture contents are kept in memory, so
//! clears of render targets can be read back.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::draw_commands::DrawCommands;
use crate::error::{GraphicsError, Result};
use crate::scope::UniformValue;
use crate::shader::ProcessedShader;

use super::backend::{DeviceBackend, DrawCall, Readback, ReadyReadback};
use super::types::{
    BackendKind, ClearOptions, DeviceCapabilities, IndexFormat, Primitive, ProgramId, Rect,
    ResourceId, ShaderTarget, TextureDesc, VertexFormat, DEFAULT_BONE_LIMIT,
};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    CreateProgram {
        program: ProgramId,
        name: String,
    },
    DestroyProgram(ProgramId),
    CreateResource(ResourceId),
    DestroyResource(ResourceId),
    SetRenderTarget(Option<ResourceId>),
    SetViewport(Rect),
    SetScissor(Rect),
    Clear(ClearOptions),
    UniformUpload {
        program: ProgramId,
        name: String,
        value: UniformValue,
    },
    Draw {
        program: ProgramId,
        primitive: Primitive,
        instances: u32,
        /// Every uniform value bound to the program when the draw ran.
        bound: BTreeMap<String, UniformValue>,
        textures: Vec<ResourceId>,
    },
    MultiDraw {
        program: ProgramId,
        draws: usize,
    },
    Submit,
    Resize {
        width: u32,
        height: u32,
    },
    Lose,
    Destroy,
}

/// Shared, inspectable list of [`BackendCall`]s.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<BackendCall>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Ref<'_, Vec<BackendCall>> {
        self.calls.borrow()
    }

    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn count(&self, predicate: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.borrow().iter().filter(|call| predicate(call)).count()
    }

    /// Number of uploads of the uniform called `name`.
    pub fn uniform_uploads(&self, name: &str) -> usize {
        self.count(|call| matches!(call, BackendCall::UniformUpload { name: n, .. } if n == name))
    }

    pub fn draws(&self) -> Vec<BackendCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, BackendCall::Draw { .. }))
            .cloned()
            .collect()
    }

    /// Value of `name` bound at the most recent draw.
    pub fn last_bound(&self, name: &str) -> Option<UniformValue> {
        self.calls.borrow().iter().rev().find_map(|call| match call {
            BackendCall::Draw { bound, .. } => bound.get(name).cloned(),
            _ => None,
        })
    }

    fn push(&self, call: BackendCall) {
        self.calls.borrow_mut().push(call);
    }
}

#[derive(Clone, Debug)]
pub struct NullOptions {
    pub log: CallLog,
    pub multi_draw: bool,
    pub target: ShaderTarget,
}

impl Default for NullOptions {
    fn default() -> Self {
        Self {
            log: CallLog::new(),
            multi_draw: false,
            target: ShaderTarget::GlslEs300,
        }
    }
}

struct NullProgram {
    uniforms: Vec<String>,
    bound: BTreeMap<String, UniformValue>,
}

struct NullTexture {
    desc: TextureDesc,
    pixels: Vec<u8>,
}

enum NullResource {
    VertexBuffer,
    IndexBuffer(IndexFormat),
    Texture(NullTexture),
    RenderTarget { color: ResourceId },
}

pub struct NullBackend {
    caps: DeviceCapabilities,
    log: CallLog,
    programs: HashMap<ProgramId, NullProgram>,
    resources: HashMap<ResourceId, NullResource>,
    target: Option<ResourceId>,
    back_buffer: Vec<u8>,
    width: u32,
    height: u32,
}

impl NullBackend {
    pub fn new(options: NullOptions) -> Self {
        Self {
            caps: DeviceCapabilities {
                backend: BackendKind::Null,
                shader_target: options.target,
                supports_multi_draw: options.multi_draw,
                supports_u8_indices: true,
                max_texture_size: 8192,
                max_uniform_block_size: 65536,
                bone_limit: DEFAULT_BONE_LIMIT,
                adapter_name: "null".to_string(),
            },
            log: options.log,
            programs: HashMap::new(),
            resources: HashMap::new(),
            target: None,
            back_buffer: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    fn check_draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        for binding in call.vertex_buffers {
            if !matches!(self.resources.get(&binding.buffer), Some(NullResource::VertexBuffer)) {
                return Err(GraphicsError::InvalidResource(format!(
                    "vertex buffer {} is not alive",
                    binding.buffer.0
                )));
            }
        }
        if call.primitive.indexed {
            let Some((buffer, _)) = call.index_buffer else {
                return Err(GraphicsError::InvalidResource(
                    "indexed draw without an index buffer".to_string(),
                ));
            };
            if !matches!(self.resources.get(&buffer), Some(NullResource::IndexBuffer(_))) {
                return Err(GraphicsError::InvalidResource(format!(
                    "index buffer {} is not alive",
                    buffer.0
                )));
            }
        }
        for binding in call.textures {
            if !matches!(self.resources.get(&binding.texture), Some(NullResource::Texture(_))) {
                return Err(GraphicsError::InvalidResource(format!(
                    "texture {} is not alive",
                    binding.texture.0
                )));
            }
        }

        let program = self.programs.get_mut(&call.program).ok_or_else(|| {
            GraphicsError::Backend(format!("program {} is not linked", call.program.0))
        })?;
        if let Some(stray) = call
            .uniforms
            .iter()
            .find(|upload| program.uniforms.get(upload.slot) != Some(&upload.name))
        {
            return Err(GraphicsError::Backend(format!(
                "uniform '{}' is not declared at slot {}",
                stray.name, stray.slot
            )));
        }
        for upload in call.uniforms {
            program.bound.insert(upload.name.clone(), upload.value.clone());
            self.log.push(BackendCall::UniformUpload {
                program: call.program,
                name: upload.name.clone(),
                value: upload.value.clone(),
            });
        }
        Ok(())
    }

    fn fill(pixels: &mut [u8], color: [f32; 4]) {
        let rgba = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        for pixel in pixels.chunks_exact_mut(4) {
            pixel.copy_from_slice(&rgba);
        }
    }
}

/// Cheap stand-in for a compiler: a stage needs an entry point and balanced
/// braces.
fn validate_stage(stage: &str, source: &str) -> Result<(), String> {
    if !source.contains("void main") {
        return Err(format!("{stage}: missing 'void main'"));
    }
    let mut depth: i64 = 0;
    for (line, text) in source.lines().enumerate() {
        for c in text.chars() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth < 0 {
                return Err(format!("{stage}:{}: unexpected '}}'", line + 1));
            }
        }
    }
    if depth != 0 {
        return Err(format!("{stage}: unbalanced braces"));
    }
    Ok(())
}

impl DeviceBackend for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn create_program(&mut self, id: ProgramId, shader: &ProcessedShader) -> Result<(), String> {
        validate_stage("vertex", &shader.vertex_source)?;
        validate_stage("fragment", &shader.fragment_source)?;
        let uniforms = shader
            .uniforms
            .fields()
            .iter()
            .map(|field| field.name.clone())
            .collect();
        self.programs.insert(
            id,
            NullProgram {
                uniforms,
                bound: BTreeMap::new(),
            },
        );
        self.log.push(BackendCall::CreateProgram {
            program: id,
            name: shader.name.clone(),
        });
        Ok(())
    }

    fn destroy_program(&mut self, id: ProgramId) {
        if self.programs.remove(&id).is_some() {
            self.log.push(BackendCall::DestroyProgram(id));
        }
    }

    fn create_vertex_buffer(
        &mut self,
        id: ResourceId,
        format: &VertexFormat,
        data: &[u8],
    ) -> Result<()> {
        if format.stride() == 0 || data.len() % format.stride() as usize != 0 {
            return Err(GraphicsError::InvalidResource(format!(
                "vertex data of {} bytes does not match stride {}",
                data.len(),
                format.stride()
            )));
        }
        self.resources.insert(id, NullResource::VertexBuffer);
        self.log.push(BackendCall::CreateResource(id));
        Ok(())
    }

    fn create_index_buffer(
        &mut self,
        id: ResourceId,
        format: IndexFormat,
        data: &[u8],
    ) -> Result<()> {
        if data.len() % format.size_bytes() as usize != 0 {
            return Err(GraphicsError::InvalidResource(format!(
                "index data of {} bytes is not a multiple of {}",
                data.len(),
                format.size_bytes()
            )));
        }
        self.resources.insert(id, NullResource::IndexBuffer(format));
        self.log.push(BackendCall::CreateResource(id));
        Ok(())
    }

    fn create_texture(
        &mut self,
        id: ResourceId,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<()> {
        let pixels = match data {
            Some(data) if data.len() == desc.byte_len() => data.to_vec(),
            Some(data) => {
                return Err(GraphicsError::InvalidResource(format!(
                    "texture '{}' expects {} bytes, got {}",
                    desc.name,
                    desc.byte_len(),
                    data.len()
                )))
            }
            None => vec![0; desc.byte_len()],
        };
        self.resources.insert(
            id,
            NullResource::Texture(NullTexture {
                desc: desc.clone(),
                pixels,
            }),
        );
        self.log.push(BackendCall::CreateResource(id));
        Ok(())
    }

    fn create_render_target(
        &mut self,
        id: ResourceId,
        color: ResourceId,
        _depth: bool,
    ) -> Result<()> {
        match self.resources.get(&color) {
            Some(NullResource::Texture(texture)) if texture.desc.renderable => {}
            _ => {
                return Err(GraphicsError::InvalidResource(format!(
                    "texture {} is not a renderable texture",
                    color.0
                )))
            }
        }
        self.resources.insert(id, NullResource::RenderTarget { color });
        self.log.push(BackendCall::CreateResource(id));
        Ok(())
    }

    fn destroy_resource(&mut self, id: ResourceId) {
        if self.resources.remove(&id).is_some() {
            if self.target == Some(id) {
                self.target = None;
            }
            self.log.push(BackendCall::DestroyResource(id));
        }
    }

    fn set_render_target(&mut self, target: Option<ResourceId>) {
        self.target = target;
        self.log.push(BackendCall::SetRenderTarget(target));
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.log.push(BackendCall::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.log.push(BackendCall::SetScissor(rect));
    }

    fn clear(&mut self, options: &ClearOptions) -> Result<()> {
        if let Some(color) = options.color {
            match self.target {
                None => {
                    self.back_buffer.resize((self.width * self.height * 4) as usize, 0);
                    Self::fill(&mut self.back_buffer, color);
                }
                Some(target) => {
                    let color_id = match self.resources.get(&target) {
                        Some(NullResource::RenderTarget { color }) => *color,
                        _ => {
                            return Err(GraphicsError::InvalidResource(format!(
                                "render target {} is not alive",
                                target.0
                            )))
                        }
                    };
                    if let Some(NullResource::Texture(texture)) =
                        self.resources.get_mut(&color_id)
                    {
                        Self::fill(&mut texture.pixels, color);
                    }
                }
            }
        }
        self.log.push(BackendCall::Clear(*options));
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<()> {
        self.check_draw(call)?;
        let bound = self
            .programs
            .get(&call.program)
            .map(|program| program.bound.clone())
            .unwrap_or_default();
        self.log.push(BackendCall::Draw {
            program: call.program,
            primitive: call.primitive,
            instances: call.instances,
            bound,
            textures: call.textures.iter().map(|binding| binding.texture).collect(),
        });
        Ok(())
    }

    fn multi_draw(&mut self, call: &DrawCall<'_>, commands: &DrawCommands) -> Result<()> {
        self.check_draw(call)?;
        self.log.push(BackendCall::MultiDraw {
            program: call.program,
            draws: commands.count(),
        });
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.log.push(BackendCall::Submit);
        Ok(())
    }

    fn read_texture(&mut self, id: ResourceId) -> Result<Box<dyn Readback>> {
        match self.resources.get(&id) {
            Some(NullResource::Texture(texture)) => {
                Ok(Box::new(ReadyReadback(Some(texture.pixels.clone()))))
            }
            _ => Err(GraphicsError::InvalidResource(format!(
                "texture {} is not alive",
                id.0
            ))),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.back_buffer.clear();
        self.log.push(BackendCall::Resize { width, height });
    }

    fn lose(&mut self) {
        self.programs.clear();
        self.resources.clear();
        self.target = None;
        self.log.push(BackendCall::Lose);
    }

    fn destroy(&mut self) {
        self.programs.clear();
        self.resources.clear();
        self.target = None;
        self.log.push(BackendCall::Destroy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::{PipelineState, UniformUpload};

    #[test]
    fn stage_validation_catches_missing_entry_points_and_braces() {
        assert!(validate_stage("vertex", "void main() { }").is_ok());
        assert!(validate_stage("vertex", "void other() { }").is_err());
        assert!(validate_stage("vertex", "void main() { {").is_err());
        assert!(validate_stage("vertex", "void main() } {").is_err());
    }

    #[test]
    fn clearing_a_render_target_fills_its_color_texture() {
        let mut backend = NullBackend::new(NullOptions::default());
        let desc = TextureDesc::new("rt", 2, 2).renderable();
        backend.create_texture(ResourceId(1), &desc, None).unwrap();
        backend
            .create_render_target(ResourceId(2), ResourceId(1), false)
            .unwrap();
        backend.set_render_target(Some(ResourceId(2)));
        backend
            .clear(&ClearOptions {
                color: Some([1.0, 0.0, 0.0, 1.0]),
                depth: None,
            })
            .unwrap();

        let mut readback = backend.read_texture(ResourceId(1)).unwrap();
        let pixels = readback.poll().unwrap().unwrap();
        assert!(readback.poll().is_none());
        assert_eq!(pixels.len(), 16);
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn non_renderable_textures_cannot_back_targets() {
        let mut backend = NullBackend::new(NullOptions::default());
        let desc = TextureDesc::new("plain", 2, 2);
        backend.create_texture(ResourceId(1), &desc, None).unwrap();
        assert!(backend
            .create_render_target(ResourceId(2), ResourceId(1), false)
            .is_err());
    }

    #[test]
    fn rejected_uploads_leave_bound_values_untouched() {
        let log = CallLog::new();
        let mut backend = NullBackend::new(NullOptions {
            log: log.clone(),
            ..NullOptions::default()
        });
        let processed = crate::shader::processor::process(
            "flat",
            ShaderTarget::GlslEs300,
            "void main() { gl_Position = vec4(0.0); }\n",
            "uniform vec4 uColor;\nvoid main() { gl_FragColor = uColor; }\n",
            &BTreeMap::new(),
        )
        .unwrap();
        backend.create_program(ProgramId(1), &processed).unwrap();

        let red = UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]);
        let uploads = [
            UniformUpload {
                slot: 0,
                name: "uColor".into(),
                value: red.clone(),
            },
            UniformUpload {
                slot: 4,
                name: "uMissing".into(),
                value: UniformValue::Float(1.0),
            },
        ];
        let mut call = DrawCall {
            program: ProgramId(1),
            primitive: Primitive::triangles(3),
            instances: 1,
            vertex_buffers: &[],
            index_buffer: None,
            uniforms: &uploads,
            textures: &[],
            state: PipelineState::default(),
        };
        assert!(backend.draw(&call).is_err());
        assert_eq!(log.uniform_uploads("uColor"), 0);

        call.uniforms = &[];
        backend.draw(&call).unwrap();
        assert_eq!(log.last_bound("uColor"), None);

        call.uniforms = &uploads[..1];
        backend.draw(&call).unwrap();
        assert_eq!(log.last_bound("uColor"), Some(red));
    }
}
