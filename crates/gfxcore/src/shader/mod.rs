//! Program variants: chunks, preprocessing, target processing and the
//! per-device library that caches the results.

pub mod chunks;
mod definition;
pub mod generators;
mod library;
pub mod options;
pub mod preprocessor;
pub mod processor;
mod program;
pub mod uniform_format;

pub use chunks::ChunkRegistry;
pub use definition::{ShaderDefinition, SourceBuilder};
pub use generators::{BasicGenerator, LitGenerator, ShaderGenerator, FAMILIES};
pub use library::{
    generation_key, processing_key, CustomShaderDesc, PrecompileFailure, PrecompileReport,
    ProgramLibrary, VariantEntry,
};
pub use options::{
    BasicOptions, FogMode, GammaMode, LightKind, LitOptions, ShaderPass, ToneMapping,
};
pub use processor::{AttributeBinding, ProcessError, ProcessedShader, SamplerBinding};
pub use program::{CompileFailure, ProgramKey, Shader, ShaderState};
pub(crate) use program::PendingUniforms;
pub use uniform_format::{UniformBufferFormat, UniformField, UniformType};
