mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::logged_device;
use gfxcore::device::{
    BackendCall, Canvas, ClearOptions, DeviceEvent, DeviceEventKind, GraphicsDevice, IndexFormat,
    Primitive, PrimitiveType, Rect, TextureDesc, VertexFormat,
};
use gfxcore::shader::{generation_key, CustomShaderDesc, ShaderState, VariantEntry};
use gfxcore::{BasicGenerator, BasicOptions, DrawCommands, GraphicsError, LitGenerator, LitOptions};

fn broken_shader() -> CustomShaderDesc {
    CustomShaderDesc {
        name: "broken".into(),
        vertex: "attribute vec3 vertex_position;\nvoid main() { gl_Position = vec4(vertex_position, 1.0);\n".into(),
        fragment: "void main() { gl_FragColor = vec4(1.0); }\n".into(),
        ..CustomShaderDesc::default()
    }
}

#[test]
fn identical_requests_share_one_program() {
    let (device, log) = logged_device(false);
    let a = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    let b = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    assert!(a.ptr_eq(&b));
    assert_eq!(a.key().to_string(), "basic#glsl300es-bones64");
    assert_eq!(
        log.count(|call| matches!(call, BackendCall::CreateProgram { .. })),
        1
    );

    let skinned = device.get_program::<BasicGenerator>(&BasicOptions::skinned()).unwrap();
    assert!(!skinned.ptr_eq(&a));
    assert_ne!(
        skinned.processed().unwrap().vertex_source,
        a.processed().unwrap().vertex_source
    );
    let stats = device.compile_stats();
    assert_eq!(stats.programs, 2);
    assert_eq!(stats.cache_hits, 1);
}

#[test]
fn failed_variants_are_cached_with_their_error() {
    let (device, log) = logged_device(false);
    let first = device.create_custom_shader(&broken_shader()).unwrap_err();
    let second = device.create_custom_shader(&broken_shader()).unwrap_err();

    for err in [&first, &second] {
        match err {
            GraphicsError::ShaderCompile { name, vertex_source, .. } => {
                assert_eq!(name, "broken");
                assert!(vertex_source.contains("void main"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(device.compile_stats().failed, 1);
    assert_eq!(
        log.count(|call| matches!(call, BackendCall::CreateProgram { .. })),
        0
    );
}

#[test]
fn recorded_variants_replay_through_precompile() {
    let (device, _) = logged_device(false);
    device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device
        .get_program::<LitGenerator>(&LitOptions {
            specular: true,
            ..LitOptions::default()
        })
        .unwrap();
    device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();

    let recorded = device.recorded_variants();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0].family, "basic");
    assert_eq!(recorded[1].family, "lit");
    assert_eq!(
        generation_key(device.capabilities(), &recorded[1]).unwrap(),
        "lit[specular=true]"
    );
    let rebuilt = device.program_for_entry(&recorded[0]).unwrap();
    assert_eq!(rebuilt.key().generation, "basic");

    let (fresh, _) = logged_device(false);
    let mut entries = recorded.clone();
    entries.push(VariantEntry {
        family: "toon".into(),
        options: serde_json::Value::Null,
    });
    let report = fresh.precompile(&entries);
    assert_eq!(report.ready, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].family, "toon");
    assert_eq!(fresh.program_count(), 2);
}

#[test]
fn destroy_evicts_programs_and_is_idempotent() {
    let (device, log) = logged_device(false);
    let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    let destroyed = Rc::new(Cell::new(0));
    let counter = Rc::clone(&destroyed);
    device
        .events()
        .on(DeviceEventKind::Destroy, move |_| counter.set(counter.get() + 1));

    device.destroy();
    device.destroy();

    assert_eq!(destroyed.get(), 1);
    assert_eq!(shader.state(), ShaderState::Evicted);
    assert_eq!(device.program_count(), 0);
    assert!(device.is_destroyed());
    assert_eq!(log.count(|call| matches!(call, BackendCall::Destroy)), 1);
    assert!(matches!(
        device.draw(Primitive::triangles(3), 1),
        Err(GraphicsError::DeviceDestroyed)
    ));
    assert!(matches!(
        device.get_program::<BasicGenerator>(&BasicOptions::default()),
        Err(GraphicsError::DeviceDestroyed)
    ));
}

#[test]
fn loss_evicts_programs_and_blocks_draws() {
    let (device, log) = logged_device(false);
    let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device.set_shader(&shader);

    device.handle_device_lost();
    device.handle_device_lost();

    assert!(device.is_lost());
    assert_eq!(shader.state(), ShaderState::Evicted);
    assert_eq!(log.count(|call| matches!(call, BackendCall::Lose)), 1);
    assert!(matches!(
        device.draw(Primitive::triangles(3), 1),
        Err(GraphicsError::DeviceLost)
    ));

    // Destroying a lost device still tears everything down once.
    device.destroy();
    assert!(device.is_destroyed());
    assert_eq!(log.count(|call| matches!(call, BackendCall::Destroy)), 1);
}

#[test]
fn render_target_switch_resets_viewport_and_scissor() {
    let (device, log) = logged_device(false);
    assert_eq!(device.viewport(), Rect::full(320, 240));

    device.set_viewport(Rect::new(10, 10, 100, 100));
    device.set_viewport(Rect::new(10, 10, 100, 100));
    let viewport_calls = log.count(|call| matches!(call, BackendCall::SetViewport(_)));

    let color = device
        .create_texture(TextureDesc::new("offscreen", 64, 32).renderable(), None)
        .unwrap();
    let target = device.create_render_target(&color, true).unwrap();
    device.set_render_target(Some(&target));
    assert_eq!(device.viewport(), Rect::full(64, 32));
    assert_eq!(device.scissor(), Rect::full(64, 32));
    assert_eq!(
        log.count(|call| matches!(call, BackendCall::SetViewport(_))),
        viewport_calls + 1
    );

    device.set_render_target(None);
    assert_eq!(device.viewport(), Rect::full(320, 240));

    device.set_render_target(Some(&target));
    target.destroy(false);
    assert!(device.render_target().is_none());
    assert!(!color.is_destroyed());
}

#[test]
fn cleared_render_targets_read_back() {
    let (device, _) = logged_device(false);
    let color = device
        .create_texture(TextureDesc::new("offscreen", 2, 2).renderable(), None)
        .unwrap();
    let target = device.create_render_target(&color, false).unwrap();
    device.set_render_target(Some(&target));
    device
        .clear(&ClearOptions {
            color: Some([0.0, 0.0, 1.0, 1.0]),
            depth: None,
        })
        .unwrap();

    let pixels = pollster::block_on(device.read_texture(&color)).unwrap();
    assert_eq!(pixels.len(), 16);
    assert!(pixels.chunks_exact(4).all(|pixel| pixel == [0, 0, 255, 255]));
}

#[test]
fn non_renderable_textures_are_rejected_as_targets() {
    let (device, _) = logged_device(false);
    let color = device.create_texture(TextureDesc::new("plain", 4, 4), None).unwrap();
    assert!(matches!(
        device.create_render_target(&color, false),
        Err(GraphicsError::InvalidResource(_))
    ));
    assert!(matches!(
        device.create_texture(TextureDesc::new("empty", 0, 4), None),
        Err(GraphicsError::InvalidResource(_))
    ));
}

fn batch() -> DrawCommands {
    let mut commands = DrawCommands::new(2);
    commands.allocate(3);
    commands.add(0, 6, 1, 0);
    commands.add(1, 3, 2, 6);
    commands.add(2, 3, 1, 9);
    assert_eq!(commands.update(3), 6 + 6 + 3);
    commands
}

fn bind_indexed_quad(device: &GraphicsDevice) {
    let positions: [[f32; 3]; 4] = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
    ];
    let indices: [u16; 12] = [0, 1, 2, 0, 2, 3, 0, 1, 2, 0, 2, 3];
    let vertices = device
        .create_vertex_buffer(VertexFormat::position_only(), &positions)
        .unwrap();
    let index_buffer = device.create_index_buffer(IndexFormat::U16, &indices).unwrap();
    device.set_vertex_buffer(&vertices);
    device.set_index_buffer(Some(&index_buffer));
}

#[test]
fn multi_draw_falls_back_to_individual_draws() {
    let (device, log) = logged_device(false);
    let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device.set_shader(&shader);
    bind_indexed_quad(&device);
    device.scope().resolve("uColor").set_value([1.0, 1.0, 1.0, 1.0]);

    device.multi_draw(PrimitiveType::Triangles, &batch()).unwrap();

    let draws = log.draws();
    assert_eq!(draws.len(), 3);
    let firsts: Vec<(u32, u32, u32)> = draws
        .iter()
        .map(|call| match call {
            BackendCall::Draw {
                primitive,
                instances,
                ..
            } => (primitive.base, primitive.count, *instances),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(firsts, vec![(0, 6, 1), (6, 3, 2), (9, 3, 1)]);
    assert_eq!(log.uniform_uploads("uColor"), 1);

    let stats = device.stats();
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.sub_draws, 3);
    assert_eq!(stats.primitives, 15);
    assert_eq!(stats.primitives_by_type[PrimitiveType::Triangles.index()], 15);
}

#[test]
fn multi_draw_uses_native_batches_when_supported() {
    let (device, log) = logged_device(true);
    let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device.set_shader(&shader);
    bind_indexed_quad(&device);

    device.multi_draw(PrimitiveType::Triangles, &batch()).unwrap();

    assert!(log.draws().is_empty());
    assert_eq!(
        log.count(|call| matches!(call, BackendCall::MultiDraw { draws: 3, .. })),
        1
    );
    assert_eq!(device.stats().multi_draw_calls, 1);
}

#[test]
fn failed_batches_upload_their_uniforms_on_the_next_batch() {
    for native in [false, true] {
        let (device, log) = logged_device(native);
        let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
        device.set_shader(&shader);
        bind_indexed_quad(&device);
        device.set_index_buffer(None);
        device.scope().resolve("uColor").set_value([0.5, 0.5, 0.5, 1.0]);

        assert!(device.multi_draw(PrimitiveType::Triangles, &batch()).is_err());
        assert_eq!(log.uniform_uploads("uColor"), 0, "native: {native}");

        bind_indexed_quad(&device);
        device.multi_draw(PrimitiveType::Triangles, &batch()).unwrap();
        assert_eq!(log.uniform_uploads("uColor"), 1, "native: {native}");
        assert_eq!(device.stats().uniform_uploads, 1);
    }
}

#[test]
fn resize_fires_an_event_and_resets_the_back_buffer_view() {
    let (device, _) = logged_device(false);
    let seen = Rc::new(Cell::new(None));
    let sink = Rc::clone(&seen);
    device.events().on(DeviceEventKind::Resize, move |event| {
        if let DeviceEvent::Resize { width, height } = event {
            sink.set(Some((*width, *height)));
        }
    });

    device.resize_canvas(800, 600);
    assert_eq!(seen.get(), Some((800, 600)));
    assert_eq!(device.viewport(), Rect::full(800, 600));
    assert_eq!(device.canvas(), Canvas::new(800, 600));
}

#[test]
fn destroyed_shaders_are_rebuilt_on_next_request() {
    let (device, log) = logged_device(false);
    let shader = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device.destroy_shader(&shader);
    assert_eq!(shader.state(), ShaderState::Evicted);
    assert_eq!(
        log.count(|call| matches!(call, BackendCall::DestroyProgram(_))),
        1
    );

    let rebuilt = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    assert!(!rebuilt.ptr_eq(&shader));
    assert!(rebuilt.is_ready());
}

#[test]
fn replacing_a_chunk_evicts_cached_programs() {
    let (device, _) = logged_device(false);
    let before = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    device.set_chunk(
        "basicMainPS",
        "void main() {\n    gl_FragColor = finalizeColor(uColor * 0.5);\n}\n",
    );
    assert_eq!(before.state(), ShaderState::Evicted);

    let after = device.get_program::<BasicGenerator>(&BasicOptions::default()).unwrap();
    assert!(after
        .processed()
        .unwrap()
        .fragment_source
        .contains("uColor * 0.5"));
}

#[test]
fn index_buffers_check_element_size() {
    let (device, _) = logged_device(false);
    let small = device.create_index_buffer(IndexFormat::U8, &[0u8, 1, 2]).unwrap();
    assert_eq!(small.index_count(), 3);
    assert!(matches!(
        device.create_index_buffer(IndexFormat::U32, &[0u16, 1, 2]),
        Err(GraphicsError::InvalidResource(_))
    ));
}
