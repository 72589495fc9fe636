use crate::device::BackendKind;

/// Errors surfaced by the graphics core.
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("no usable graphics backend (tried {tried:?})")]
    UnsupportedEnvironment { tried: Vec<BackendKind> },
    #[error("failed to compile shader '{name}' ({key}) on {backend}: {message}")]
    ShaderCompile {
        name: String,
        key: String,
        backend: BackendKind,
        message: String,
        vertex_source: String,
        fragment_source: String,
    },
    #[error("graphics device was lost")]
    DeviceLost,
    #[error("graphics device has been destroyed")]
    DeviceDestroyed,
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("unknown shader program '{0}'")]
    UnknownProgram(String),
    #[error("invalid shader options: {0}")]
    Options(#[from] serde_json::Error),
}

pub type Result<T, E = GraphicsError> = std::result::Result<T, E>;
