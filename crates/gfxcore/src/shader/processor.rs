//! Rewrites preprocessed portable chunk code for a concrete shader target.
//!
//! The portable dialect declares inputs the GLSL ES 1.00 way. Processing
//! collects those declarations, assigns locations and bindings, and emits
//! either:
//!
//! * GLSL ES 3.00 with loose uniforms for WebGL2-style devices, or
//! * GLSL 450 for WebGPU-style devices, where loose uniforms are gathered
//!   into one std140 block at `set = 0, binding = 0` and each sampler is split
//!   into a texture/sampler pair in `set = 1`.
//!
//! The resulting [`ProcessedShader`] also carries the uniform layout and the
//! sampler list, which are the program's declared inputs at draw time.

use std::collections::BTreeMap;

use serde::Serialize;

use super::uniform_format::{UniformBufferFormat, UniformType};
use crate::device::{Semantic, ShaderTarget};

/// Name of the fragment output every target writes to.
pub const FRAGMENT_OUTPUT: &str = "pc_fragColor";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessError {
    #[error("attribute '{0}' has no known semantic")]
    UnknownAttribute(String),
    #[error("varying '{0}' is read by the fragment stage but never declared by the vertex stage")]
    UnmatchedVarying(String),
    #[error("'{name}' is declared as both {first} and {second}")]
    ConflictingDeclaration {
        name: String,
        first: String,
        second: String,
    },
    #[error("uniform '{name}' has unsupported type '{ty}'")]
    UnsupportedUniform { name: String, ty: String },
    #[error("array size '{size}' of '{name}' does not resolve to an integer")]
    UnresolvedArraySize { name: String, size: String },
    #[error("malformed declaration '{0}'")]
    Malformed(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AttributeBinding {
    pub name: String,
    pub semantic: Semantic,
    pub location: u32,
    pub glsl_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SamplerBinding {
    pub name: String,
    /// Sampler index; in GLSL 450 output the texture lives at binding
    /// `2 * slot` and the sampler at `2 * slot + 1` of set 1.
    pub slot: u32,
}

/// Target-specific sources plus the declared program inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessedShader {
    pub name: String,
    pub target: ShaderTarget,
    pub vertex_source: String,
    pub fragment_source: String,
    pub attributes: Vec<AttributeBinding>,
    pub uniforms: UniformBufferFormat,
    pub samplers: Vec<SamplerBinding>,
}

impl ProcessedShader {
    pub fn attribute(&self, semantic: Semantic) -> Option<&AttributeBinding> {
        self.attributes
            .iter()
            .find(|attribute| attribute.semantic == semantic)
    }
}

#[derive(Clone, Debug)]
struct Declaration {
    ty: String,
    name: String,
    array: Option<String>,
}

#[derive(Default)]
struct Stage {
    attributes: Vec<Declaration>,
    varyings: Vec<Declaration>,
    uniforms: Vec<Declaration>,
    body: Vec<String>,
}

/// Processes a preprocessed vertex/fragment pair for `target`.
///
/// `attribute_semantics` overrides the name-based semantic lookup for custom
/// attribute names.
pub fn process(
    name: &str,
    target: ShaderTarget,
    vertex: &str,
    fragment: &str,
    attribute_semantics: &BTreeMap<String, Semantic>,
) -> Result<ProcessedShader, ProcessError> {
    let vertex_stage = split_stage(vertex, false)?;
    let fragment_stage = split_stage(fragment, true)?;

    let mut attributes = Vec::with_capacity(vertex_stage.attributes.len());
    for declaration in &vertex_stage.attributes {
        let semantic = attribute_semantics
            .get(&declaration.name)
            .copied()
            .or_else(|| Semantic::from_attribute_name(&declaration.name))
            .ok_or_else(|| ProcessError::UnknownAttribute(declaration.name.clone()))?;
        attributes.push(AttributeBinding {
            name: declaration.name.clone(),
            semantic,
            location: semantic.location(),
            glsl_type: declaration.ty.clone(),
        });
    }
    attributes.sort_by_key(|attribute| attribute.location);

    let mut varying_locations = BTreeMap::new();
    for (location, declaration) in vertex_stage.varyings.iter().enumerate() {
        varying_locations.insert(
            declaration.name.clone(),
            (location as u32, declaration.ty.clone()),
        );
    }
    for declaration in &fragment_stage.varyings {
        match varying_locations.get(&declaration.name) {
            None => return Err(ProcessError::UnmatchedVarying(declaration.name.clone())),
            Some((_, ty)) if *ty != declaration.ty => {
                return Err(ProcessError::ConflictingDeclaration {
                    name: declaration.name.clone(),
                    first: ty.clone(),
                    second: declaration.ty.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let mut uniforms = UniformBufferFormat::new();
    let mut samplers: Vec<SamplerBinding> = Vec::new();
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for declaration in vertex_stage.uniforms.iter().chain(&fragment_stage.uniforms) {
        let signature = declaration.signature();
        if let Some(previous) = seen.get(&declaration.name) {
            if *previous != signature {
                return Err(ProcessError::ConflictingDeclaration {
                    name: declaration.name.clone(),
                    first: previous.clone(),
                    second: signature,
                });
            }
            continue;
        }
        seen.insert(declaration.name.clone(), signature);

        if declaration.ty == "sampler2D" {
            samplers.push(SamplerBinding {
                name: declaration.name.clone(),
                slot: samplers.len() as u32,
            });
            continue;
        }

        let ty = UniformType::from_glsl(&declaration.ty).ok_or_else(|| {
            ProcessError::UnsupportedUniform {
                name: declaration.name.clone(),
                ty: declaration.ty.clone(),
            }
        })?;
        let array_len = match &declaration.array {
            None => None,
            Some(size) => Some(size.trim().parse::<u32>().map_err(|_| {
                ProcessError::UnresolvedArraySize {
                    name: declaration.name.clone(),
                    size: size.clone(),
                }
            })?),
        };
        uniforms.push(&declaration.name, ty, array_len);
    }

    let emitter = Emitter {
        target,
        name,
        uniforms: &uniforms,
        samplers: &samplers,
        varying_locations: &varying_locations,
    };
    let vertex_source = emitter.vertex(&attributes, &vertex_stage);
    let fragment_source = emitter.fragment(&fragment_stage);

    Ok(ProcessedShader {
        name: name.to_string(),
        target,
        vertex_source,
        fragment_source,
        attributes,
        uniforms,
        samplers,
    })
}

impl Declaration {
    fn signature(&self) -> String {
        match &self.array {
            Some(size) => format!("{}[{size}]", self.ty),
            None => self.ty.clone(),
        }
    }
}

fn split_stage(source: &str, fragment: bool) -> Result<Stage, ProcessError> {
    let mut stage = Stage::default();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("#version") || trimmed.starts_with("precision ") {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("attribute ") {
            if fragment {
                return Err(ProcessError::Malformed(trimmed.to_string()));
            }
            stage.attributes.push(parse_declaration(rest, trimmed)?);
        } else if let Some(rest) = trimmed.strip_prefix("varying ") {
            stage.varyings.push(parse_declaration(rest, trimmed)?);
        } else if let Some(rest) = trimmed.strip_prefix("uniform ") {
            stage.uniforms.push(parse_declaration(rest, trimmed)?);
        } else {
            let mut rewritten = line.replace("texture2D(", "texture(");
            if fragment {
                rewritten = rewritten.replace("gl_FragColor", FRAGMENT_OUTPUT);
            }
            stage.body.push(rewritten);
        }
    }
    Ok(stage)
}

fn parse_declaration(rest: &str, line: &str) -> Result<Declaration, ProcessError> {
    let malformed = || ProcessError::Malformed(line.to_string());
    let rest = rest.trim().strip_suffix(';').ok_or_else(malformed)?.trim();

    let mut tokens: Vec<&str> = rest
        .split_whitespace()
        .filter(|token| !matches!(*token, "highp" | "mediump" | "lowp" | "flat"))
        .collect();
    if tokens.len() < 2 {
        return Err(malformed());
    }
    let ty = tokens.remove(0).to_string();
    let declarator: String = tokens.concat();

    let (name, array) = match declarator.split_once('[') {
        Some((name, size)) => {
            let size = size.strip_suffix(']').ok_or_else(malformed)?;
            (name.to_string(), Some(size.to_string()))
        }
        None => (declarator, None),
    };
    if name.is_empty() || name.contains(',') {
        return Err(malformed());
    }
    Ok(Declaration { ty, name, array })
}

struct Emitter<'a> {
    target: ShaderTarget,
    name: &'a str,
    uniforms: &'a UniformBufferFormat,
    samplers: &'a [SamplerBinding],
    varying_locations: &'a BTreeMap<String, (u32, String)>,
}

impl Emitter<'_> {
    fn header(&self, out: &mut String) {
        match self.target {
            ShaderTarget::Glsl450 => out.push_str("#version 450\n"),
            ShaderTarget::GlslEs300 => {
                out.push_str("#version 300 es\nprecision highp float;\nprecision highp int;\n")
            }
        }
        out.push_str(&format!("// program: {}\n", self.name));
    }

    fn inputs(&self, out: &mut String) {
        match self.target {
            ShaderTarget::Glsl450 => {
                if !self.uniforms.is_empty() {
                    out.push_str("layout(std140, set = 0, binding = 0) uniform ub_program {\n");
                    for field in self.uniforms.fields() {
                        out.push_str("    ");
                        out.push_str(&field.declaration());
                        out.push('\n');
                    }
                    out.push_str("};\n");
                }
                for sampler in self.samplers {
                    let name = &sampler.name;
                    out.push_str(&format!(
                        "layout(set = 1, binding = {}) uniform texture2D {name}_texture;\n",
                        sampler.slot * 2
                    ));
                    out.push_str(&format!(
                        "layout(set = 1, binding = {}) uniform sampler {name}_sampler;\n",
                        sampler.slot * 2 + 1
                    ));
                    out.push_str(&format!(
                        "#define {name} sampler2D({name}_texture, {name}_sampler)\n"
                    ));
                }
            }
            ShaderTarget::GlslEs300 => {
                for field in self.uniforms.fields() {
                    out.push_str("uniform ");
                    out.push_str(&field.declaration());
                    out.push('\n');
                }
                for sampler in self.samplers {
                    out.push_str(&format!("uniform sampler2D {};\n", sampler.name));
                }
            }
        }
    }

    fn vertex(&self, attributes: &[AttributeBinding], stage: &Stage) -> String {
        let mut out = String::new();
        self.header(&mut out);
        self.inputs(&mut out);
        for attribute in attributes {
            out.push_str(&format!(
                "layout(location = {}) in {} {};\n",
                attribute.location, attribute.glsl_type, attribute.name
            ));
        }
        for declaration in &stage.varyings {
            self.varying(&mut out, declaration, "out");
        }
        push_body(&mut out, &stage.body);
        out
    }

    fn fragment(&self, stage: &Stage) -> String {
        let mut out = String::new();
        self.header(&mut out);
        self.inputs(&mut out);
        for declaration in &stage.varyings {
            self.varying(&mut out, declaration, "in");
        }
        match self.target {
            ShaderTarget::Glsl450 => {
                out.push_str(&format!("layout(location = 0) out vec4 {FRAGMENT_OUTPUT};\n"))
            }
            ShaderTarget::GlslEs300 => out.push_str(&format!(
                "layout(location = 0) out highp vec4 {FRAGMENT_OUTPUT};\n"
            )),
        }
        push_body(&mut out, &stage.body);
        out
    }

    fn varying(&self, out: &mut String, declaration: &Declaration, direction: &str) {
        let location = self
            .varying_locations
            .get(&declaration.name)
            .map(|(location, _)| *location)
            .unwrap_or(0);
        let flat = if declaration.ty.starts_with('i') || declaration.ty.starts_with('u') {
            "flat "
        } else {
            ""
        };
        // GLSL ES 3.00 has no location qualifier on varyings; they link by name.
        let layout = match self.target {
            ShaderTarget::Glsl450 => format!("layout(location = {location}) "),
            ShaderTarget::GlslEs300 => String::new(),
        };
        out.push_str(&format!(
            "{layout}{flat}{direction} {} {};\n",
            declaration.ty, declaration.name
        ));
    }
}

fn push_body(out: &mut String, body: &[String]) {
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "attribute vec3 vertex_position;
attribute vec2 vertex_texCoord0;
uniform mat4 matrix_model;
uniform vec4 matrix_pose[4];
varying vec2 vUv0;
void main() {
    vUv0 = vertex_texCoord0;
    gl_Position = matrix_model * vec4(vertex_position, 1.0);
}
";

    const FRAGMENT: &str = "uniform vec4 uColor;
uniform mat4 matrix_model;
uniform sampler2D texture_diffuseMap;
varying vec2 vUv0;
void main() {
    gl_FragColor = uColor * texture2D(texture_diffuseMap, vUv0);
}
";

    fn run(target: ShaderTarget) -> ProcessedShader {
        process("test", target, VERTEX, FRAGMENT, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn collects_declared_inputs() {
        let processed = run(ShaderTarget::Glsl450);
        let names: Vec<&str> = processed
            .uniforms
            .fields()
            .iter()
            .map(|field| field.name.as_str())
            .collect();
        assert_eq!(names, vec!["matrix_model", "matrix_pose", "uColor"]);
        assert_eq!(processed.uniforms.field("matrix_pose").unwrap().array_len, Some(4));
        assert_eq!(processed.samplers.len(), 1);
        assert_eq!(processed.samplers[0].name, "texture_diffuseMap");

        let semantics: Vec<Semantic> = processed.attributes.iter().map(|a| a.semantic).collect();
        assert_eq!(semantics, vec![Semantic::Position, Semantic::TexCoord0]);
    }

    #[test]
    fn glsl450_output_uses_blocks_and_split_samplers() {
        let processed = run(ShaderTarget::Glsl450);
        let fs = &processed.fragment_source;
        assert!(fs.starts_with("#version 450\n"));
        assert!(fs.contains("layout(std140, set = 0, binding = 0) uniform ub_program {"));
        assert!(fs.contains(
            "layout(set = 1, binding = 0) uniform texture2D texture_diffuseMap_texture;"
        ));
        assert!(fs.contains(
            "layout(set = 1, binding = 1) uniform sampler texture_diffuseMap_sampler;"
        ));
        assert!(fs.contains("layout(location = 0) in vec2 vUv0;"));
        assert!(fs.contains("pc_fragColor = uColor * texture(texture_diffuseMap, vUv0);"));
        assert!(!fs.contains("uniform vec4 uColor;"));

        let vs = &processed.vertex_source;
        assert!(vs.contains("layout(location = 0) in vec3 vertex_position;"));
        assert!(vs.contains("layout(location = 6) in vec2 vertex_texCoord0;"));
        assert!(vs.contains("layout(location = 0) out vec2 vUv0;"));
    }

    #[test]
    fn glsl300es_output_keeps_loose_uniforms() {
        let processed = run(ShaderTarget::GlslEs300);
        let fs = &processed.fragment_source;
        assert!(fs.starts_with("#version 300 es\n"));
        assert!(fs.contains("uniform vec4 uColor;"));
        assert!(fs.contains("uniform sampler2D texture_diffuseMap;"));
        assert!(fs.contains("out highp vec4 pc_fragColor;"));
        assert!(!fs.contains("ub_program"));
    }

    #[test]
    fn glsl300es_varyings_link_by_name() {
        let processed = run(ShaderTarget::GlslEs300);
        assert!(processed.vertex_source.contains("\nout vec2 vUv0;\n"));
        assert!(processed.fragment_source.contains("\nin vec2 vUv0;\n"));
        for source in [&processed.vertex_source, &processed.fragment_source] {
            assert!(!source.contains(") out vec2 vUv0"), "{source}");
            assert!(!source.contains(") in vec2 vUv0"), "{source}");
        }
    }

    #[test]
    fn unmatched_varying_is_rejected() {
        let fragment = "varying vec3 vNormalW;\nvoid main() { gl_FragColor = vec4(vNormalW, 1.0); }\n";
        let err = process("test", ShaderTarget::Glsl450, VERTEX, fragment, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, ProcessError::UnmatchedVarying("vNormalW".into()));
    }

    #[test]
    fn conflicting_uniform_types_are_rejected() {
        let fragment = "uniform vec3 matrix_model;\nvoid main() { gl_FragColor = vec4(matrix_model, 1.0); }\n";
        let err = process("test", ShaderTarget::Glsl450, VERTEX, fragment, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ProcessError::ConflictingDeclaration { .. }));
    }

    #[test]
    fn custom_attribute_names_need_a_semantic() {
        let vertex = "attribute vec3 aPos;\nvoid main() { gl_Position = vec4(aPos, 1.0); }\n";
        let fragment = "void main() { gl_FragColor = vec4(1.0); }\n";
        let err = process("custom", ShaderTarget::Glsl450, vertex, fragment, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, ProcessError::UnknownAttribute("aPos".into()));

        let mut semantics = BTreeMap::new();
        semantics.insert("aPos".to_string(), Semantic::Position);
        let processed =
            process("custom", ShaderTarget::Glsl450, vertex, fragment, &semantics).unwrap();
        assert_eq!(processed.attributes[0].location, 0);
    }

    #[test]
    fn unresolved_array_sizes_are_rejected() {
        let vertex = "uniform vec4 matrix_pose[BONES];\nvoid main() { gl_Position = matrix_pose[0]; }\n";
        let fragment = "void main() { gl_FragColor = vec4(1.0); }\n";
        let err = process("test", ShaderTarget::Glsl450, vertex, fragment, &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnresolvedArraySize { .. }));
    }
}
