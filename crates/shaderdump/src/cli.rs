use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gfxcore::device::{BackendKind, ShaderTarget};

#[derive(Parser, Debug)]
#[command(
    name = "shaderdump",
    author,
    version,
    about = "Generate, inspect and precompile program variants"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print (or write) the processed sources of one variant.
    Generate(GenerateArgs),
    /// Build every variant of a dumped list on a real device.
    Precompile(PrecompileArgs),
    /// Print the generation key of every variant in a dumped list.
    Keys(KeysArgs),
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Program family (`basic` or `lit`).
    #[arg(value_name = "FAMILY")]
    pub family: String,

    /// Family options as a JSON object, e.g. `{"skin":true}`.
    #[arg(long, value_name = "JSON")]
    pub options: Option<String>,

    /// Shading language flavour: `webgl2` (GLSL ES 3.00) or `webgpu` (GLSL 450).
    #[arg(
        long,
        value_name = "TARGET",
        value_parser = parse_target,
        default_value = "webgl2"
    )]
    pub target: ShaderTarget,

    /// Write `<key>.vert` and `<key>.frag` into DIR instead of printing.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct PrecompileArgs {
    /// JSON list of `{"family": ..., "options": {...}}` entries. Defaults to
    /// the config's `shaders.precompile`.
    #[arg(value_name = "VARIANTS")]
    pub variants: Option<PathBuf>,

    /// Device configuration; defaults apply when omitted.
    #[arg(long, value_name = "FILE", env = "SHADERDUMP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured backend list (e.g. `null` or `webgpu`).
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendKind>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct KeysArgs {
    #[arg(value_name = "VARIANTS")]
    pub variants: PathBuf,

    #[arg(
        long,
        value_name = "TARGET",
        value_parser = parse_target,
        default_value = "webgl2"
    )]
    pub target: ShaderTarget,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_target(value: &str) -> Result<ShaderTarget, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("target must not be empty".to_string());
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "webgl2" | "webgl" | "gl" | "glsl300es" => Ok(ShaderTarget::GlslEs300),
        "webgpu" | "wgpu" | "glsl450" => Ok(ShaderTarget::Glsl450),
        other => Err(format!(
            "unknown target '{other}'; expected webgl2 or webgpu"
        )),
    }
}

pub fn parse_backend(value: &str) -> Result<BackendKind, String> {
    value.parse()
}
