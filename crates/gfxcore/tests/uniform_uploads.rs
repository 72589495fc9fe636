mod common;

use common::{bind_triangle, logged_device};
use gfxcore::device::{BackendCall, Primitive};
use gfxcore::{BasicGenerator, BasicOptions, UniformValue};

#[test]
fn uniform_uploads_follow_scope_versions() {
    let (device, log) = logged_device(false);
    let color = device.scope().resolve("uColor");
    color.set_value([1.0, 0.0, 0.0, 1.0]);

    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions {
            skin: false,
            ..BasicOptions::default()
        })
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);

    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(
        log.last_bound("uColor"),
        Some(UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]))
    );
    assert_eq!(log.uniform_uploads("uColor"), 1);

    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(log.uniform_uploads("uColor"), 1);
    assert_eq!(
        log.last_bound("uColor"),
        Some(UniformValue::Vec4([1.0, 0.0, 0.0, 1.0]))
    );

    color.set_value([0.0, 1.0, 0.0, 1.0]);
    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(log.uniform_uploads("uColor"), 2);
    assert_eq!(
        log.last_bound("uColor"),
        Some(UniformValue::Vec4([0.0, 1.0, 0.0, 1.0]))
    );
    assert_eq!(device.stats().draw_calls, 3);
}

#[test]
fn rejected_draws_keep_uniform_changes_pending() {
    let (device, log) = logged_device(false);
    let color = device.scope().resolve("uColor");
    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions::default())
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);

    color.set_value([0.0, 0.0, 1.0, 1.0]);
    assert!(device.draw(Primitive::indexed_triangles(3), 1).is_err());
    assert_eq!(log.uniform_uploads("uColor"), 0);
    assert_eq!(device.stats().uniform_uploads, 0);

    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(log.uniform_uploads("uColor"), 1);
    assert_eq!(
        log.last_bound("uColor"),
        Some(UniformValue::Vec4([0.0, 0.0, 1.0, 1.0]))
    );
    assert_eq!(device.stats().uniform_uploads, 1);
}

#[test]
fn setting_the_same_value_still_uploads_once() {
    let (device, log) = logged_device(false);
    let color = device.scope().resolve("uColor");
    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions::default())
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);

    color.set_value([1.0, 0.0, 0.0, 1.0]);
    device.draw(Primitive::triangles(3), 1).unwrap();
    color.set_value([1.0, 0.0, 0.0, 1.0]);
    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(log.uniform_uploads("uColor"), 2);
}

#[test]
fn unset_uniforms_are_not_uploaded() {
    let (device, log) = logged_device(false);
    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions::default())
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);

    device.draw(Primitive::triangles(3), 1).unwrap();
    assert_eq!(log.uniform_uploads("uColor"), 0);
    assert_eq!(log.last_bound("uColor"), None);
    assert_eq!(log.draws().len(), 1);
}

#[test]
fn programs_track_uploads_independently() {
    let (device, log) = logged_device(false);
    let color = device.scope().resolve("uColor");
    color.set_value([0.5, 0.5, 0.5, 1.0]);

    let plain = device
        .get_program::<BasicGenerator>(&BasicOptions::default())
        .unwrap();
    let colored = device
        .get_program::<BasicGenerator>(&BasicOptions {
            vertex_colors: true,
            ..BasicOptions::default()
        })
        .unwrap();
    assert!(!plain.ptr_eq(&colored));
    bind_triangle(&device);

    device.set_shader(&plain);
    device.draw(Primitive::triangles(3), 1).unwrap();
    device.set_shader(&colored);
    device.draw(Primitive::triangles(3), 1).unwrap();

    let uploads = log.count(|call| {
        matches!(call, BackendCall::UniformUpload { name, .. } if name == "uColor")
    });
    assert_eq!(uploads, 2);
    assert_eq!(device.stats().shader_switches, 2);
}

#[test]
fn unset_samplers_fall_back_to_the_default_texture() {
    let (device, log) = logged_device(false);
    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions {
            diffuse_map: true,
            ..BasicOptions::default()
        })
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);

    device.draw(Primitive::triangles(3), 1).unwrap();
    device.draw(Primitive::triangles(3), 1).unwrap();

    let white = device.resources().unwrap().white.id();
    for draw in log.draws() {
        let BackendCall::Draw { textures, .. } = draw else {
            unreachable!();
        };
        assert_eq!(textures, vec![white]);
    }
    assert_eq!(device.stats().texture_fallbacks, 2);
}

#[test]
fn bound_textures_reach_the_backend() {
    let (device, log) = logged_device(false);
    let texture = device
        .create_texture(gfxcore::device::TextureDesc::new("albedo", 2, 2), None)
        .unwrap();
    device.scope().resolve("texture_diffuseMap").set_value(&texture);

    let shader = device
        .get_program::<BasicGenerator>(&BasicOptions {
            diffuse_map: true,
            ..BasicOptions::default()
        })
        .unwrap();
    device.set_shader(&shader);
    bind_triangle(&device);
    device.draw(Primitive::triangles(3), 1).unwrap();

    let Some(BackendCall::Draw { textures, .. }) = log.draws().pop() else {
        panic!("no draw recorded");
    };
    assert_eq!(textures, vec![texture.id()]);

    texture.destroy();
    assert!(!device.scope().resolve("texture_diffuseMap").is_set());
    assert_eq!(device.stats().texture_fallbacks, 0);
}
