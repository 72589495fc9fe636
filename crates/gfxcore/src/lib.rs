//! Graphics core: uniform scopes, shared-resource caches, multi-draw batches,
//! program variants and the device they run on.
//!
//! ```text
//!   ScopeSpace ── resolve("uColor") ──▶ ScopeId ── set_value ──▶ Version bump
//!        │                                                        │
//!   GraphicsDevice::get_program::<G>(options)                      │
//!        │  generation key ─▶ ShaderDefinition (chunks + defines)  │
//!        │  processing key ─▶ preprocess ─▶ process ─▶ backend     │
//!        ▼                                                        ▼
//!   set_shader / set_vertex_buffer ─▶ draw ─▶ upload changed uniforms only
//! ```
//!
//! The device owns one [`ProgramLibrary`](shader::ProgramLibrary), one
//! [`ScopeSpace`] and a backend: the `wgpu` backends (feature `gpu`) or the
//! [`NullBackend`](device::NullBackend), which records every call and needs no
//! GPU.

pub mod cache;
pub mod device;
pub mod draw_commands;
pub mod error;
pub mod scope;
pub mod shader;
pub mod version;

pub use cache::{Destroy, DeviceCache, DeviceCacheEntry, RefCountedCache, RefGuard};
pub use device::{create_graphics_device, Canvas, DeviceOptions, GraphicsDevice};
pub use draw_commands::DrawCommands;
pub use error::{GraphicsError, Result};
pub use scope::{ScopeId, ScopeSpace, UniformValue};
pub use shader::{BasicGenerator, BasicOptions, LitGenerator, LitOptions, Shader};
pub use version::{Version, VersionedObject};
