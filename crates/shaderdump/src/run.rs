use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use deviceconfig::DeviceConfig;
use gfxcore::create_graphics_device;
use gfxcore::device::{
    BackendKind, Canvas, GraphicsDevice, NullBackend, NullOptions, ShaderTarget,
};
use gfxcore::shader::{generation_key, ProcessedShader, VariantEntry, FAMILIES};
use tracing_subscriber::EnvFilter;

use crate::cli::{GenerateArgs, KeysArgs, PrecompileArgs};

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Device that processes and validates sources for `target` without a GPU.
fn offline_device(target: ShaderTarget) -> GraphicsDevice {
    let backend = NullBackend::new(NullOptions {
        target,
        ..NullOptions::default()
    });
    GraphicsDevice::with_backend(Box::new(backend), Canvas::default(), Default::default())
}

fn read_variants(path: &Path) -> Result<Vec<VariantEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read variant list {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse variant list {}", path.display()))
}

pub fn generate(args: GenerateArgs) -> Result<()> {
    if !FAMILIES.contains(&args.family.as_str()) {
        bail!(
            "unknown program family '{}'; expected one of: {}",
            args.family,
            FAMILIES.join(", ")
        );
    }
    let options = match &args.options {
        Some(raw) => serde_json::from_str(raw).context("--options must be a JSON object")?,
        None => serde_json::Value::Null,
    };
    let entry = VariantEntry {
        family: args.family.clone(),
        options,
    };

    let device = offline_device(args.target);
    let shader = device
        .program_for_entry(&entry)
        .with_context(|| format!("failed to build '{}' variant", args.family))?;
    let processed = shader
        .processed()
        .context("variant has no processed sources")?;
    let key = &shader.key().generation;
    tracing::debug!(key = %shader.key(), "generated variant");

    match &args.out {
        Some(dir) => write_sources(dir, key, processed),
        None => {
            println!("key: {key}");
            println!("--- vertex ---");
            println!("{}", processed.vertex_source);
            println!("--- fragment ---");
            println!("{}", processed.fragment_source);
            Ok(())
        }
    }
}

fn write_sources(dir: &Path, key: &str, processed: &ProcessedShader) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    let stem = file_stem(key);
    for (extension, source) in [
        ("vert", &processed.vertex_source),
        ("frag", &processed.fragment_source),
    ] {
        let path = dir.join(format!("{stem}.{extension}"));
        fs::write(&path, source).with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

/// File-system friendly form of a generation key: `basic[skin=true]` becomes
/// `basic_skin_true`.
fn file_stem(key: &str) -> String {
    let mut stem = String::with_capacity(key.len());
    for ch in key.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            stem.push(ch);
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }
    stem.trim_end_matches('_').to_string()
}

pub fn keys(args: KeysArgs) -> Result<()> {
    let entries = read_variants(&args.variants)?;
    let device = offline_device(args.target);
    for entry in &entries {
        let key = generation_key(device.capabilities(), entry)
            .with_context(|| format!("failed to key '{}' variant", entry.family))?;
        println!("{} {}", entry.family, key);
    }
    Ok(())
}

pub fn precompile(args: PrecompileArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => DeviceConfig::load(path)
            .with_context(|| format!("failed to load device config {}", path.display()))?,
        None => DeviceConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backends = vec![backend];
    }
    let Some(variants) = args.variants.as_ref().or(config.shaders.precompile.as_ref()) else {
        bail!("no variant list given and the config has no shaders.precompile");
    };
    let entries = read_variants(variants)?;

    let options = config.device_options();
    let device = pollster::block_on(create_graphics_device(config.canvas(), &options))
        .context("failed to create graphics device")?;
    let caps = device.capabilities();
    tracing::info!(
        backend = %caps.backend,
        adapter = %caps.adapter_name,
        variants = entries.len(),
        "precompiling program variants"
    );
    if caps.backend == BackendKind::Null {
        tracing::warn!("precompiling on the null backend; sources are validated but not compiled");
    }

    let report = device.precompile(&entries);
    let stats = device.compile_stats();
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        println!(
            "ready {} failed {} ({:?})",
            report.ready,
            report.failed.len(),
            stats.compile_time
        );
        for failure in &report.failed {
            println!("  {:<8} {}", failure.family, failure.error);
        }
    }
    device.destroy();

    if !report.is_success() && config.shaders.fail_fast {
        bail!("{} program variant(s) failed to build", report.failed.len());
    }
    Ok(())
}
