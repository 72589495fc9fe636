use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Graphics API family a device runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Explicit bind-group model (wgpu's primary backends).
    WebGpu,
    /// Global binding-state model (wgpu's GL backend).
    WebGl2,
    /// No GPU; calls are validated and recorded.
    Null,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::WebGpu => "webgpu",
            BackendKind::WebGl2 => "webgl2",
            BackendKind::Null => "null",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "webgpu" | "wgpu" => Ok(BackendKind::WebGpu),
            "webgl2" | "webgl" | "gl" => Ok(BackendKind::WebGl2),
            "null" | "headless" => Ok(BackendKind::Null),
            other => Err(format!(
                "unknown backend '{other}'; expected webgpu, webgl2, or null"
            )),
        }
    }
}

/// Shading language flavour the shader processor emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderTarget {
    /// GLSL ES 3.00 with loose uniforms (WebGL2).
    GlslEs300,
    /// Vulkan-flavoured GLSL 450 with uniform blocks and split samplers.
    Glsl450,
}

impl ShaderTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShaderTarget::GlslEs300 => "glsl300es",
            ShaderTarget::Glsl450 => "glsl450",
        }
    }
}

impl fmt::Display for ShaderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a device, unique within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Identity of a GPU resource owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Identity of a linked program owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

/// Headless drawing surface; its size is the back buffer size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    Low,
    #[default]
    High,
}

/// Options for [`create_graphics_device`](super::create_graphics_device).
#[derive(Clone, Debug)]
pub struct DeviceOptions {
    /// Backends to try, most preferred first.
    pub backends: Vec<BackendKind>,
    pub power_preference: PowerPreference,
    /// Refuse software rasterizers.
    pub fail_if_major_performance_caveat: bool,
    /// Upper bound on skinning bones; clamped to what uniform space allows.
    pub bone_limit: u32,
    /// Log a warning when a program variant takes longer than this to build.
    pub slow_compile_threshold: Option<Duration>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            backends: vec![BackendKind::WebGpu, BackendKind::WebGl2],
            power_preference: PowerPreference::High,
            fail_if_major_performance_caveat: false,
            bone_limit: DEFAULT_BONE_LIMIT,
            slow_compile_threshold: None,
        }
    }
}

pub const DEFAULT_BONE_LIMIT: u32 = 64;

/// What a backend can do; also feeds the shader processing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub backend: BackendKind,
    pub shader_target: ShaderTarget,
    pub supports_multi_draw: bool,
    pub supports_u8_indices: bool,
    pub max_texture_size: u32,
    pub max_uniform_block_size: u32,
    pub bone_limit: u32,
    pub adapter_name: String,
}

impl DeviceCapabilities {
    /// Largest bone count whose pose palette fits the uniform block.
    pub fn clamp_bone_limit(&mut self, requested: u32) {
        let per_bone = 3 * 16;
        let reserved = 1024;
        let fit = self.max_uniform_block_size.saturating_sub(reserved) / per_bone;
        self.bone_limit = requested.min(fit).max(1);
    }
}

/// Role of a vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Semantic {
    Position,
    Normal,
    Tangent,
    BlendWeight,
    BlendIndices,
    Color,
    TexCoord0,
    TexCoord1,
    InstanceLine1,
    InstanceLine2,
    InstanceLine3,
    InstanceLine4,
}

impl Semantic {
    pub const ALL: [Semantic; 12] = [
        Semantic::Position,
        Semantic::Normal,
        Semantic::Tangent,
        Semantic::BlendWeight,
        Semantic::BlendIndices,
        Semantic::Color,
        Semantic::TexCoord0,
        Semantic::TexCoord1,
        Semantic::InstanceLine1,
        Semantic::InstanceLine2,
        Semantic::InstanceLine3,
        Semantic::InstanceLine4,
    ];

    /// Fixed shader location for this semantic.
    pub fn location(&self) -> u32 {
        match self {
            Semantic::Position => 0,
            Semantic::Normal => 1,
            Semantic::Tangent => 2,
            Semantic::BlendWeight => 3,
            Semantic::BlendIndices => 4,
            Semantic::Color => 5,
            Semantic::TexCoord0 => 6,
            Semantic::TexCoord1 => 7,
            Semantic::InstanceLine1 => 12,
            Semantic::InstanceLine2 => 13,
            Semantic::InstanceLine3 => 14,
            Semantic::InstanceLine4 => 15,
        }
    }

    /// Conventional attribute name used by the built-in chunks.
    pub fn attribute_name(&self) -> &'static str {
        match self {
            Semantic::Position => "vertex_position",
            Semantic::Normal => "vertex_normal",
            Semantic::Tangent => "vertex_tangent",
            Semantic::BlendWeight => "vertex_boneWeights",
            Semantic::BlendIndices => "vertex_boneIndices",
            Semantic::Color => "vertex_color",
            Semantic::TexCoord0 => "vertex_texCoord0",
            Semantic::TexCoord1 => "vertex_texCoord1",
            Semantic::InstanceLine1 => "instance_line1",
            Semantic::InstanceLine2 => "instance_line2",
            Semantic::InstanceLine3 => "instance_line3",
            Semantic::InstanceLine4 => "instance_line4",
        }
    }

    pub fn from_attribute_name(name: &str) -> Option<Self> {
        Semantic::ALL
            .iter()
            .copied()
            .find(|semantic| semantic.attribute_name() == name)
    }

    pub fn is_instanced(&self) -> bool {
        matches!(
            self,
            Semantic::InstanceLine1
                | Semantic::InstanceLine2
                | Semantic::InstanceLine3
                | Semantic::InstanceLine4
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexDataType {
    Float32,
    Uint8,
    Uint8Normalized,
}

impl VertexDataType {
    pub fn size(&self) -> u32 {
        match self {
            VertexDataType::Float32 => 4,
            VertexDataType::Uint8 | VertexDataType::Uint8Normalized => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexElement {
    pub semantic: Semantic,
    pub components: u32,
    pub data_type: VertexDataType,
    pub offset: u32,
}

/// Interleaved layout of one vertex buffer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexFormat {
    elements: Vec<VertexElement>,
    stride: u32,
    instancing: bool,
}

impl VertexFormat {
    /// Builds an interleaved format; offsets are assigned in order with each
    /// element aligned to 4 bytes.
    pub fn new(elements: &[(Semantic, u32, VertexDataType)]) -> Self {
        let mut offset = 0;
        let mut laid_out = Vec::with_capacity(elements.len());
        for &(semantic, components, data_type) in elements {
            laid_out.push(VertexElement {
                semantic,
                components,
                data_type,
                offset,
            });
            offset += (components * data_type.size()).next_multiple_of(4);
        }
        let instancing = laid_out
            .iter()
            .any(|element| element.semantic.is_instanced());
        Self {
            elements: laid_out,
            stride: offset,
            instancing,
        }
    }

    /// Position-only float3 format.
    pub fn position_only() -> Self {
        Self::new(&[(Semantic::Position, 3, VertexDataType::Float32)])
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn is_instancing(&self) -> bool {
        self.instancing
    }

    pub fn has(&self, semantic: Semantic) -> bool {
        self.elements
            .iter()
            .any(|element| element.semantic == semantic)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U8,
    U16,
    U32,
}

impl IndexFormat {
    pub fn size_bytes(&self) -> u32 {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 5] = [
        PrimitiveType::Points,
        PrimitiveType::Lines,
        PrimitiveType::LineStrip,
        PrimitiveType::Triangles,
        PrimitiveType::TriangleStrip,
    ];

    /// Position in [`FrameStats::primitives_by_type`].
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// One draw's worth of vertex range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    pub kind: PrimitiveType,
    pub base: u32,
    pub count: u32,
    pub indexed: bool,
}

impl Primitive {
    pub fn triangles(count: u32) -> Self {
        Self {
            kind: PrimitiveType::Triangles,
            base: 0,
            count,
            indexed: false,
        }
    }

    pub fn indexed_triangles(count: u32) -> Self {
        Self {
            indexed: true,
            ..Self::triangles(count)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    #[default]
    None,
    /// `src * a + dst * (1 - a)`
    Normal,
    Additive,
    Premultiplied,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test: bool,
    pub write: bool,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test: true,
            write: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }
    /// `true` when the rect covers no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClearOptions {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

impl Default for ClearOptions {
    fn default() -> Self {
        Self {
            color: Some([0.0, 0.0, 0.0, 1.0]),
            depth: Some(1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Rgba8Srgb,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Texture can be used as a render target color attachment.
    pub renderable: bool,
}

impl TextureDesc {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            format: TextureFormat::Rgba8,
            renderable: false,
        }
    }

    pub fn renderable(mut self) -> Self {
        self.renderable = true;
        self
    }

    pub fn byte_len(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

/// Per-frame counters; reset with `GraphicsDevice::reset_stats`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub draw_calls: u64,
    pub multi_draw_calls: u64,
    pub sub_draws: u64,
    /// Vertices (or indices) submitted, times instances.
    pub primitives: u64,
    /// `primitives` split by [`PrimitiveType::index`].
    pub primitives_by_type: [u64; 5],
    pub shader_switches: u64,
    pub uniform_uploads: u64,
    pub texture_fallbacks: u64,
}

/// Program-build counters kept for the lifetime of a device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CompileStats {
    pub programs: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub compile_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("wgpu".parse::<BackendKind>().unwrap(), BackendKind::WebGpu);
        assert_eq!(" GL ".parse::<BackendKind>().unwrap(), BackendKind::WebGl2);
        assert_eq!("headless".parse::<BackendKind>().unwrap(), BackendKind::Null);
        assert!("vulkan".parse::<BackendKind>().is_err());
    }

    #[test]
    fn vertex_format_lays_out_interleaved_elements() {
        let format = VertexFormat::new(&[
            (Semantic::Position, 3, VertexDataType::Float32),
            (Semantic::Color, 4, VertexDataType::Uint8Normalized),
            (Semantic::TexCoord0, 2, VertexDataType::Float32),
        ]);
        let offsets: Vec<u32> = format.elements().iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 12, 16]);
        assert_eq!(format.stride(), 24);
        assert!(!format.is_instancing());
    }

    #[test]
    fn semantics_round_trip_attribute_names() {
        for semantic in Semantic::ALL {
            assert_eq!(
                Semantic::from_attribute_name(semantic.attribute_name()),
                Some(semantic)
            );
        }
        assert_eq!(Semantic::from_attribute_name("vertex_unknown"), None);
    }

    #[test]
    fn bone_limit_is_clamped_to_uniform_space() {
        let mut caps = DeviceCapabilities {
            backend: BackendKind::Null,
            shader_target: ShaderTarget::Glsl450,
            supports_multi_draw: false,
            supports_u8_indices: true,
            max_texture_size: 4096,
            max_uniform_block_size: 16384,
            bone_limit: 0,
            adapter_name: String::new(),
        };
        caps.clamp_bone_limit(1000);
        assert_eq!(caps.bone_limit, (16384 - 1024) / 48);
        caps.clamp_bone_limit(32);
        assert_eq!(caps.bone_limit, 32);
    }
}
