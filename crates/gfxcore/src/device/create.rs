use crate::error::{GraphicsError, Result};

use super::graphics_device::GraphicsDevice;
use super::null::{NullBackend, NullOptions};
use super::types::{BackendKind, Canvas, DeviceOptions};

/// Creates a device on the first backend in `options.backends` that works.
pub async fn create_graphics_device(
    canvas: Canvas,
    options: &DeviceOptions,
) -> Result<GraphicsDevice> {
    let mut tried = Vec::with_capacity(options.backends.len());
    for &kind in &options.backends {
        tried.push(kind);
        match kind {
            BackendKind::Null => {
                let backend = NullBackend::new(NullOptions::default());
                return Ok(GraphicsDevice::with_backend(
                    Box::new(backend),
                    canvas,
                    options.clone(),
                ));
            }
            BackendKind::WebGpu | BackendKind::WebGl2 => {
                match create_gpu_backend(kind, canvas, options).await {
                    Ok(device) => return Ok(device),
                    Err(err) => {
                        tracing::debug!(backend = %kind, error = %err, "backend unavailable")
                    }
                }
            }
        }
    }
    Err(GraphicsError::UnsupportedEnvironment { tried })
}

#[cfg(feature = "gpu")]
async fn create_gpu_backend(
    kind: BackendKind,
    canvas: Canvas,
    options: &DeviceOptions,
) -> Result<GraphicsDevice> {
    let backend = super::gpu::WgpuBackend::new(kind, canvas, options).await?;
    Ok(GraphicsDevice::with_backend(
        Box::new(backend),
        canvas,
        options.clone(),
    ))
}

#[cfg(not(feature = "gpu"))]
async fn create_gpu_backend(
    kind: BackendKind,
    _canvas: Canvas,
    _options: &DeviceOptions,
) -> Result<GraphicsDevice> {
    Err(GraphicsError::Backend(format!("{kind} support was not compiled in")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_is_always_available() {
        let options = DeviceOptions {
            backends: vec![BackendKind::Null],
            ..DeviceOptions::default()
        };
        let device =
            pollster::block_on(create_graphics_device(Canvas::new(32, 32), &options)).unwrap();
        assert_eq!(device.capabilities().backend, BackendKind::Null);
    }

    #[test]
    fn empty_preference_list_is_unsupported() {
        let options = DeviceOptions {
            backends: Vec::new(),
            ..DeviceOptions::default()
        };
        let err =
            pollster::block_on(create_graphics_device(Canvas::default(), &options)).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::UnsupportedEnvironment { ref tried } if tried.is_empty()
        ));
    }
}
