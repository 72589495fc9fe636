//! Per-device cache of program variants.
//!
//! Requests go through two levels: the generation key (family plus
//! non-default options) selects a [`ShaderDefinition`], and the processing
//! key (device target and bone limit) selects the linked [`Shader`]. Failed
//! builds are cached as sentinels so a broken variant is reported once and
//! never rebuilt on every draw.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::chunks::ChunkRegistry;
use super::generators::{BasicGenerator, LitGenerator, ShaderGenerator};
use super::preprocessor::preprocess;
use super::processor::{process, ProcessedShader};
use super::program::{CompileFailure, ProgramKey, Shader, ShaderState};
use super::ShaderDefinition;
use crate::device::{CompileStats, DeviceCapabilities, GraphicsDevice, ProgramId, Semantic};
use crate::error::{GraphicsError, Result};

/// One recorded `(family, options)` request; lists of these are what
/// `precompile` consumes and `shaderdump` reads and writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantEntry {
    pub family: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrecompileFailure {
    pub family: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PrecompileReport {
    pub ready: usize,
    pub failed: Vec<PrecompileFailure>,
}

impl PrecompileReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// User-supplied program built outside the generator families.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomShaderDesc {
    /// Unique name; the program is cached under `custom:{name}`.
    pub name: String,
    pub vertex: String,
    pub fragment: String,
    /// Semantics for attribute names the built-in table doesn't know.
    pub attributes: BTreeMap<String, Semantic>,
    pub defines: BTreeMap<String, String>,
    /// Chunk sources layered over the device registry for this program only.
    pub includes: BTreeMap<String, String>,
}

pub struct ProgramLibrary {
    definitions: RefCell<HashMap<String, Rc<ShaderDefinition>>>,
    programs: RefCell<HashMap<ProgramKey, Shader>>,
    recorded: RefCell<Vec<VariantEntry>>,
    recorded_keys: RefCell<HashSet<String>>,
    stats: Cell<CompileStats>,
    next_id: Cell<u64>,
    slow_compile_threshold: Option<Duration>,
}

impl ProgramLibrary {
    pub fn new(slow_compile_threshold: Option<Duration>) -> Self {
        Self {
            definitions: RefCell::new(HashMap::new()),
            programs: RefCell::new(HashMap::new()),
            recorded: RefCell::new(Vec::new()),
            recorded_keys: RefCell::new(HashSet::new()),
            stats: Cell::new(CompileStats::default()),
            next_id: Cell::new(1),
            slow_compile_threshold,
        }
    }

    /// Returns the program for `options` of family `G`, building it on first
    /// request.
    pub fn get<G: ShaderGenerator>(
        &self,
        device: &GraphicsDevice,
        options: &G::Options,
    ) -> Result<Shader> {
        device.ensure_usable()?;
        let caps = device.capabilities();
        let generation = G::generate_key(caps, options)?;
        let key = ProgramKey {
            generation: generation.clone(),
            processing: processing_key(caps),
        };
        if let Some(shader) = self.cached(&key) {
            return shader_result(&shader, caps);
        }

        let cached_definition = self.definitions.borrow().get(&generation).cloned();
        let definition = match cached_definition {
            Some(definition) => definition,
            None => {
                let chunks = device.chunks();
                let definition = Rc::new(G::create_shader_definition(caps, options, &chunks));
                self.definitions
                    .borrow_mut()
                    .insert(generation.clone(), Rc::clone(&definition));
                definition
            }
        };
        self.record(G::NAME, &generation, options)?;

        let shader = self.build(device, key, &definition, None);
        shader_result(&shader, caps)
    }

    /// Builds or returns the user program registered under `desc.name`.
    pub fn create_custom(
        &self,
        device: &GraphicsDevice,
        desc: &CustomShaderDesc,
    ) -> Result<Shader> {
        device.ensure_usable()?;
        let caps = device.capabilities();
        let key = ProgramKey {
            generation: format!("custom:{}", desc.name),
            processing: processing_key(caps),
        };
        if let Some(shader) = self.cached(&key) {
            return shader_result(&shader, caps);
        }

        let definition = ShaderDefinition {
            name: desc.name.clone(),
            attributes: desc.attributes.clone(),
            vshader: desc.vertex.clone(),
            fshader: desc.fragment.clone(),
            defines: desc.defines.clone(),
        };
        let shader = self.build(device, key, &definition, Some(&desc.includes));
        shader_result(&shader, caps)
    }

    /// Builds one recorded entry by dispatching on its family name.
    pub fn precompile_entry(
        &self,
        device: &GraphicsDevice,
        entry: &VariantEntry,
    ) -> Result<Shader> {
        match entry.family.as_str() {
            family if family == BasicGenerator::NAME => {
                let options = options_from_value(&entry.options)?;
                self.get::<BasicGenerator>(device, &options)
            }
            family if family == LitGenerator::NAME => {
                let options = options_from_value(&entry.options)?;
                self.get::<LitGenerator>(device, &options)
            }
            other => Err(GraphicsError::UnknownProgram(other.to_string())),
        }
    }

    /// Builds every entry up front and reports what succeeded.
    pub fn precompile(
        &self,
        device: &GraphicsDevice,
        entries: &[VariantEntry],
    ) -> PrecompileReport {
        let mut report = PrecompileReport::default();
        for entry in entries {
            match self.precompile_entry(device, entry) {
                Ok(_) => report.ready += 1,
                Err(err) => report.failed.push(PrecompileFailure {
                    family: entry.family.clone(),
                    error: err.to_string(),
                }),
            }
        }
        tracing::info!(
            ready = report.ready,
            failed = report.failed.len(),
            "precompiled program variants"
        );
        report
    }

    /// Every distinct `(family, options)` pair requested so far, in request
    /// order.
    pub fn recorded_variants(&self) -> Vec<VariantEntry> {
        self.recorded.borrow().clone()
    }

    /// Forgets `shader` so the next request rebuilds it. Returns whether it
    /// was cached.
    pub fn remove_from_cache(&self, shader: &Shader) -> bool {
        let removed = {
            let mut programs = self.programs.borrow_mut();
            match programs.get(shader.key()) {
                Some(cached) if cached.ptr_eq(shader) => programs.remove(shader.key()),
                _ => None,
            }
        };
        shader.evict();
        removed.is_some()
    }

    /// Evicts every program and definition. Returns the programs that were
    /// linked so the caller can release their native objects.
    pub fn clear(&self) -> Vec<Shader> {
        self.definitions.borrow_mut().clear();
        let evicted: Vec<Shader> = self.programs.borrow_mut().drain().map(|(_, s)| s).collect();
        let mut linked = Vec::new();
        for shader in evicted {
            if shader.is_ready() {
                linked.push(shader.clone());
            }
            shader.evict();
        }
        if !linked.is_empty() {
            tracing::debug!(programs = linked.len(), "evicted program cache");
        }
        linked
    }

    pub fn len(&self) -> usize {
        self.programs.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.borrow().is_empty()
    }

    pub fn stats(&self) -> CompileStats {
        self.stats.get()
    }

    fn cached(&self, key: &ProgramKey) -> Option<Shader> {
        let shader = self.programs.borrow().get(key).cloned()?;
        self.update_stats(|stats| stats.cache_hits += 1);
        Some(shader)
    }

    fn record<O: Serialize>(&self, family: &str, generation: &str, options: &O) -> Result<()> {
        if !self.recorded_keys.borrow_mut().insert(generation.to_string()) {
            return Ok(());
        }
        let options = serde_json::to_value(options)?;
        self.recorded.borrow_mut().push(VariantEntry {
            family: family.to_string(),
            options,
        });
        Ok(())
    }

    fn build(
        &self,
        device: &GraphicsDevice,
        key: ProgramKey,
        definition: &ShaderDefinition,
        includes: Option<&BTreeMap<String, String>>,
    ) -> Shader {
        let id = ProgramId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let shader = Shader::new(id, key.clone(), &definition.name);
        self.programs.borrow_mut().insert(key.clone(), shader.clone());

        shader.begin_compile();
        let started = Instant::now();
        let caps = device.capabilities();

        let chunks = match includes {
            Some(includes) => device.chunks().with_overrides(includes),
            None => device.chunks().clone(),
        };

        let outcome = assemble(device, caps, definition, &chunks, id);
        let elapsed = started.elapsed();
        match outcome {
            Ok(processed) => {
                shader.link(processed, device.scope());
                self.update_stats(|stats| {
                    stats.programs += 1;
                    stats.compile_time += elapsed;
                });
                tracing::debug!(key = %key, ?elapsed, "built program variant");
                if let Some(threshold) = self.slow_compile_threshold {
                    if elapsed > threshold {
                        tracing::warn!(key = %key, ?elapsed, "slow program variant build");
                    }
                }
            }
            Err(failure) => {
                tracing::error!(
                    name = %definition.name,
                    key = %key,
                    backend = %caps.backend,
                    error = %failure.message,
                    "failed to build program variant\n--- vertex ---\n{}\n--- fragment ---\n{}",
                    failure.vertex_source,
                    failure.fragment_source
                );
                shader.fail(failure);
                self.update_stats(|stats| {
                    stats.failed += 1;
                    stats.compile_time += elapsed;
                });
            }
        }
        shader
    }

    fn update_stats(&self, update: impl FnOnce(&mut CompileStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

impl Default for ProgramLibrary {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Preprocesses, processes and links one definition. Failures carry the
/// most processed sources reached.
fn assemble(
    device: &GraphicsDevice,
    caps: &DeviceCapabilities,
    definition: &ShaderDefinition,
    chunks: &ChunkRegistry,
    id: ProgramId,
) -> std::result::Result<ProcessedShader, CompileFailure> {
    let fail = |message: String, vertex: &str, fragment: &str| CompileFailure {
        message,
        vertex_source: vertex.to_string(),
        fragment_source: fragment.to_string(),
    };

    let vertex = preprocess(&definition.vshader, &definition.defines, chunks)
        .map_err(|err| fail(format!("vertex: {err}"), &definition.vshader, &definition.fshader))?;
    let fragment = preprocess(&definition.fshader, &definition.defines, chunks)
        .map_err(|err| fail(format!("fragment: {err}"), &vertex, &definition.fshader))?;
    let processed = process(
        &definition.name,
        caps.shader_target,
        &vertex,
        &fragment,
        &definition.attributes,
    )
    .map_err(|err| fail(err.to_string(), &vertex, &fragment))?;
    device.compile_program(id, &processed).map_err(|message| {
        fail(message, &processed.vertex_source, &processed.fragment_source)
    })?;
    Ok(processed)
}

/// Generation key `entry` would be cached under on a device with `caps`.
pub fn generation_key(caps: &DeviceCapabilities, entry: &VariantEntry) -> Result<String> {
    match entry.family.as_str() {
        family if family == BasicGenerator::NAME => {
            BasicGenerator::generate_key(caps, &options_from_value(&entry.options)?)
        }
        family if family == LitGenerator::NAME => {
            LitGenerator::generate_key(caps, &options_from_value(&entry.options)?)
        }
        other => Err(GraphicsError::UnknownProgram(other.to_string())),
    }
}

/// Capability part of a program key.
pub fn processing_key(caps: &DeviceCapabilities) -> String {
    format!("{}-bones{}", caps.shader_target, caps.bone_limit)
}

fn options_from_value<O: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Result<O> {
    let value = match value {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    Ok(serde_json::from_value(value)?)
}

fn shader_result(shader: &Shader, caps: &DeviceCapabilities) -> Result<Shader> {
    match shader.state() {
        ShaderState::Failed => {
            let failure = shader.failure().cloned().unwrap_or_else(|| CompileFailure {
                message: "unknown failure".to_string(),
                vertex_source: String::new(),
                fragment_source: String::new(),
            });
            Err(GraphicsError::ShaderCompile {
                name: shader.name().to_string(),
                key: shader.key().to_string(),
                backend: caps.backend,
                message: failure.message,
                vertex_source: failure.vertex_source,
                fragment_source: failure.fragment_source,
            })
        }
        _ => Ok(shader.clone()),
    }
}
