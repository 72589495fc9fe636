#![allow(dead_code)]

use gfxcore::device::{CallLog, Canvas, GraphicsDevice, NullBackend, NullOptions, VertexFormat};

/// Null-backed device at 320x240 that records every backend call.
pub fn logged_device(multi_draw: bool) -> (GraphicsDevice, CallLog) {
    let log = CallLog::new();
    let backend = NullBackend::new(NullOptions {
        log: log.clone(),
        multi_draw,
        ..NullOptions::default()
    });
    let device =
        GraphicsDevice::with_backend(Box::new(backend), Canvas::new(320, 240), Default::default());
    (device, log)
}

pub fn bind_triangle(device: &GraphicsDevice) {
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let buffer = device
        .create_vertex_buffer(VertexFormat::position_only(), &positions)
        .unwrap();
    device.set_vertex_buffer(&buffer);
}
