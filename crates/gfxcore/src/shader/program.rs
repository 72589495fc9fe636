use std::cell::{Cell, OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use super::processor::ProcessedShader;
use crate::device::{ProgramId, UniformUpload};
use crate::scope::{ScopeId, ScopeSpace};
use crate::version::Version;

/// Cache key of a linked program: what was generated, and how it was
/// processed for the device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProgramKey {
    pub generation: String,
    pub processing: String,
}

impl fmt::Display for ProgramKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.generation, self.processing)
    }
}

/// Why a variant failed, with the sources that were fed to the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompileFailure {
    pub message: String,
    pub vertex_source: String,
    pub fragment_source: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderState {
    Uncompiled,
    Compiling,
    Ready,
    Failed,
    /// Dropped from its library by device destruction, loss or an explicit
    /// removal. The handle stays valid but can no longer be drawn with.
    Evicted,
}

/// Uniform uploads collected for one draw, with the scope versions they
/// carry.
#[derive(Default)]
pub(crate) struct PendingUniforms {
    pub(crate) uploads: Vec<UniformUpload>,
    versions: Vec<Version>,
}

/// Handle to one program variant owned by a device's program library.
///
/// Clones share state.
#[derive(Clone)]
pub struct Shader {
    inner: Rc<ShaderInner>,
}

struct ShaderInner {
    id: ProgramId,
    key: ProgramKey,
    name: String,
    state: Cell<ShaderState>,
    processed: OnceCell<ProcessedShader>,
    failure: OnceCell<CompileFailure>,
    uniforms: OnceCell<Vec<ScopeId>>,
    samplers: OnceCell<Vec<ScopeId>>,
    observed: RefCell<Vec<Version>>,
    warned_samplers: RefCell<Vec<bool>>,
}

impl Shader {
    pub(crate) fn new(id: ProgramId, key: ProgramKey, name: &str) -> Self {
        Self::from_inner(ShaderInner {
            id,
            key,
            name: name.to_string(),
            state: Cell::new(ShaderState::Uncompiled),
            processed: OnceCell::new(),
            failure: OnceCell::new(),
            uniforms: OnceCell::new(),
            samplers: OnceCell::new(),
            observed: RefCell::new(Vec::new()),
            warned_samplers: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn begin_compile(&self) {
        self.inner.state.set(ShaderState::Compiling);
    }

    /// Marks the program linked and resolves its declared inputs in `scope`.
    pub(crate) fn link(&self, processed: ProcessedShader, scope: &ScopeSpace) {
        let uniforms: Vec<ScopeId> = processed
            .uniforms
            .fields()
            .iter()
            .map(|field| scope.resolve(&field.name))
            .collect();
        let samplers: Vec<ScopeId> = processed
            .samplers
            .iter()
            .map(|sampler| scope.resolve(&sampler.name))
            .collect();
        *self.inner.observed.borrow_mut() = vec![Version::NONE; uniforms.len()];
        *self.inner.warned_samplers.borrow_mut() = vec![false; samplers.len()];
        let _ = self.inner.uniforms.set(uniforms);
        let _ = self.inner.samplers.set(samplers);
        let _ = self.inner.processed.set(processed);
        self.inner.state.set(ShaderState::Ready);
    }

    /// Turns the handle into a cached failure sentinel so the variant is not
    /// rebuilt on every request.
    pub(crate) fn fail(&self, failure: CompileFailure) {
        let _ = self.inner.failure.set(failure);
        self.inner.state.set(ShaderState::Failed);
    }

    fn from_inner(inner: ShaderInner) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.inner.id
    }

    pub fn key(&self) -> &ProgramKey {
        &self.inner.key
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ShaderState {
        self.inner.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ShaderState::Ready
    }

    pub fn error(&self) -> Option<&str> {
        self.failure().map(|failure| failure.message.as_str())
    }

    pub fn failure(&self) -> Option<&CompileFailure> {
        self.inner.failure.get()
    }

    /// Target sources and declared inputs; `None` for failed variants.
    pub fn processed(&self) -> Option<&ProcessedShader> {
        self.inner.processed.get()
    }

    pub fn ptr_eq(&self, other: &Shader) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn evict(&self) {
        self.inner.state.set(ShaderState::Evicted);
    }

    /// Uniform values whose scope version moved since this program last
    /// uploaded them. Nothing is marked observed until
    /// [`Shader::commit_uniforms`] runs.
    pub(crate) fn pending_uniforms(&self) -> PendingUniforms {
        let observed = self.inner.observed.borrow();
        let mut pending = PendingUniforms::default();
        let Some(uniforms) = self.inner.uniforms.get() else {
            return pending;
        };
        for (slot, id) in uniforms.iter().enumerate() {
            let current = id.version();
            if observed[slot] == current {
                continue;
            }
            // Unset values are skipped and stay pending until the next set.
            let Some(value) = id.value() else {
                continue;
            };
            pending.versions.push(current);
            pending.uploads.push(UniformUpload {
                slot,
                name: id.name().to_string(),
                value,
            });
        }
        pending
    }

    /// Records that the backend accepted `pending`.
    pub(crate) fn commit_uniforms(&self, pending: &PendingUniforms) {
        let mut observed = self.inner.observed.borrow_mut();
        for (upload, version) in pending.uploads.iter().zip(&pending.versions) {
            if let Some(seen) = observed.get_mut(upload.slot) {
                *seen = *version;
            }
        }
    }

    pub(crate) fn sampler_ids(&self) -> &[ScopeId] {
        self.inner.samplers.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns `true` the first time it is called for `index`.
    pub(crate) fn first_unset_sampler_warning(&self, index: usize) -> bool {
        let mut warned = self.inner.warned_samplers.borrow_mut();
        match warned.get_mut(index) {
            Some(flag) if !*flag => {
                *flag = true;
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key.to_string())
            .field("state", &self.state())
            .finish()
    }
}
