//! Frame-level tests of the deferred renderer on the headless backend.
//!
//! Covers:
//! - Uniform stream layout (global block size, entity block alignment, matrices)
//! - Pass sequencing for every render mode
//! - Bloom pass ordering and mip generation
//! - Shader hot reload and the caches it invalidates
//! - Fatal vertex layout mismatches

mod common;

use common::{copy_shaders, pass_commands, pass_labels, TestRenderer};
use deferred_engine::backend::{
    BindGroupEntry, Blend, CompareFunction, DepthState, DeviceLimits, FrameContext, GraphicsBackend,
    HeadlessBackend, LoadOp, RecordedCommand,
};
use deferred_engine::error::RenderError;
use deferred_engine::pipeline::bindings::set;
use deferred_engine::pipeline::framebuffer::DEPTH_FORMAT;
use deferred_engine::pipeline::{slot, FramebufferStatus, RenderConfig, RenderMode, BLOOM_LEVELS};
use deferred_engine::resources::{Material, MeshBuilder, Model, ScreenVertex, SubmeshLayout};
use deferred_engine::scene::Transform;
use glam::{Mat4, Vec2, Vec3};
use rstest::rstest;
use std::fs::OpenOptions;
use std::time::{Duration, SystemTime};

fn config_with_mode(mode: RenderMode) -> RenderConfig {
    RenderConfig {
        mode,
        ..Default::default()
    }
}

// ============================================================================
// Uniform stream layout
// ============================================================================

#[rstest]
#[case::no_lights(256, 0, 16)]
#[case::one_light(256, 1, 76)]
#[case::three_lights(48, 3, 204)]
#[case::max_lights(64, 16, 1036)]
#[case::lights_beyond_max_are_dropped(256, 20, 1036)]
fn test_global_block_and_entity_alignment(
    #[case] alignment: u32,
    #[case] light_count: usize,
    #[case] global_size: u64,
) {
    let limits = DeviceLimits {
        min_uniform_buffer_offset_alignment: alignment,
        ..Default::default()
    };
    let backend = HeadlessBackend::with_limits(800, 600, limits);
    let mut test = TestRenderer::with_backend(backend, &common::shader_path(), RenderConfig::default());

    let cube = test.add_cube_model();
    let entities: Vec<_> = (0..3)
        .map(|i| {
            test.scene
                .add_entity(cube, Transform::from_position(Vec3::new(i as f32, 0.0, 0.0)))
        })
        .collect();
    for i in 0..light_count {
        test.scene
            .add_point_light(Vec3::new(i as f32, 1.0, 0.0), Vec3::ONE);
    }
    test.update();

    let blocks = *test.renderer.blocks();
    assert_eq!(blocks.global.offset, 0);
    assert_eq!(blocks.global.size, global_size);
    assert_eq!(blocks.lights, light_count.min(16));
    assert_eq!(blocks.entities, 3);

    let mut previous_end = blocks.global.end();
    for entity in entities {
        let local = test.scene.local_block(entity).unwrap();
        assert_eq!(local.offset % alignment as u64, 0);
        assert!(local.offset >= previous_end);
        assert_eq!(local.size, 128);
        previous_end = local.end();
    }

    for block in [
        blocks.geometry,
        blocks.bloom.bright,
        blocks.bloom.blur_horizontal,
        blocks.bloom.blur_vertical,
        blocks.bloom.combine,
    ] {
        assert_eq!(block.offset % alignment as u64, 0);
        assert!(block.offset >= previous_end);
    }
}

#[test]
fn test_light_records_start_on_16_byte_boundaries() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.scene
        .add_directional_light(Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.5, 0.5, 0.5));
    test.scene
        .add_point_light(Vec3::new(1.0, 2.0, 3.0), Vec3::new(1.0, 0.0, 0.0));
    test.update();

    let contents = test
        .backend
        .buffer_contents(test.renderer.stream().buffer())
        .unwrap();
    let u32_at = |offset: usize| u32::from_ne_bytes(contents[offset..offset + 4].try_into().unwrap());
    let vec3_at = |offset: usize| -> Vec<f32> { bytemuck::pod_collect_to_vec(&contents[offset..offset + 12]) };

    assert_eq!(vec3_at(0), vec![0.0, 4.0, 15.0]);
    assert_eq!(u32_at(12), 2);
    // kind, color, direction, position of each light
    assert_eq!(u32_at(16), 0);
    assert_eq!(vec3_at(32), vec![0.5, 0.5, 0.5]);
    assert_eq!(vec3_at(48), vec![0.0, -1.0, 0.0]);
    assert_eq!(u32_at(80), 1);
    assert_eq!(vec3_at(96), vec![1.0, 0.0, 0.0]);
    assert_eq!(vec3_at(128), vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_world_view_projection_is_uploaded() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    let cube = test.add_cube_model();
    let entity = test
        .scene
        .add_entity(cube, Transform::from_position(Vec3::new(2.0, 0.0, 0.0)));
    test.update();

    let world = Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0));
    let view = Mat4::look_at_rh(Vec3::new(0.0, 4.0, 15.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(60f32.to_radians(), 4.0 / 3.0, 0.1, 1000.0);
    let expected = projection * view * world;

    let block = test.scene.local_block(entity).unwrap();
    let contents = test
        .backend
        .buffer_contents(test.renderer.stream().buffer())
        .unwrap();
    let floats: Vec<f32> =
        bytemuck::pod_collect_to_vec(&contents[block.offset as usize..block.end() as usize]);
    let uploaded_world = Mat4::from_cols_slice(&floats[..16]);
    let uploaded_wvp = Mat4::from_cols_slice(&floats[16..32]);

    assert!(uploaded_world.abs_diff_eq(world, 1e-6));
    assert!(uploaded_wvp.abs_diff_eq(expected, 1e-4));
}

#[test]
fn test_entity_draws_bind_their_local_block() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    let (stats, commands) = test.frame();
    assert_eq!(stats.geometry_draws, 1);

    let entity = test.scene.entities()[0];
    let local = test.scene.local_block(entity).unwrap();
    let local_offsets: Vec<&Vec<u32>> = commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetBindGroup {
                index,
                dynamic_offsets,
                ..
            } if *index == set::LOCAL => Some(dynamic_offsets),
            _ => None,
        })
        .collect();
    assert!(local_offsets.contains(&&vec![local.offset as u32]));
}

fn local_offsets(commands: &[RecordedCommand]) -> Vec<Vec<u32>> {
    commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetBindGroup {
                index,
                dynamic_offsets,
                ..
            } if *index == set::LOCAL => Some(dynamic_offsets.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_entity_spawned_after_update_waits_for_next_frame() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    test.update();
    let first = test.scene.entities()[0];
    let first_block = test.scene.local_block(first).unwrap();

    let cube = test.add_cube_model();
    let late = test.scene.add_entity(cube, Transform::from_position(Vec3::X));
    assert_eq!(test.scene.local_block(late), None);

    test.backend.take_commands();
    let frame = test.backend.begin_frame().unwrap();
    let stats = test
        .renderer
        .render(&mut test.backend, &mut test.registry, &mut test.scene, &frame)
        .unwrap();
    test.backend.end_frame().unwrap();
    let commands = test.backend.take_commands();

    // Only the entity written by the update draws, never at the global block's offset
    assert_eq!(stats.geometry_draws, 1);
    assert_eq!(
        local_offsets(pass_commands(&commands, "Geometry Pass")),
        vec![vec![first_block.offset as u32]]
    );

    let (stats, commands) = test.frame();
    assert_eq!(stats.geometry_draws, 2);
    let late_block = test.scene.local_block(late).unwrap();
    assert_ne!(late_block.offset, test.renderer.blocks().global.offset);
    assert!(local_offsets(pass_commands(&commands, "Geometry Pass")).contains(&vec![late_block.offset as u32]));
}

// ============================================================================
// Render modes
// ============================================================================

#[rstest]
#[case::forward(RenderMode::ForwardRender, false, false)]
#[case::model(RenderMode::Model, true, true)]
#[case::normals(RenderMode::Normals, true, true)]
#[case::albedo(RenderMode::Albedo, true, true)]
#[case::depth(RenderMode::Depth, true, true)]
#[case::position(RenderMode::Position, true, true)]
fn test_mode_selects_passes(#[case] mode: RenderMode, #[case] lighting: bool, #[case] bloom: bool) {
    let mut test = TestRenderer::new(800, 600, config_with_mode(mode));
    test.populate();
    let (stats, commands) = test.frame();

    assert_eq!(stats.lighting, lighting);
    assert_eq!(stats.bloom, bloom);
    assert!(stats.presented);

    let labels = pass_labels(&commands);
    assert_eq!(labels[..3], ["Clear Swapchain", "Bloom Reset", "Geometry Pass"]);
    assert_eq!(labels.contains(&"Lighting Pass".to_string()), lighting);
    assert_eq!(labels.iter().any(|l| l.starts_with("Bloom") && l != "Bloom Reset"), bloom);
    assert_eq!(labels.last().map(String::as_str), Some("Present"));
}

#[rstest]
#[case::forward(RenderMode::ForwardRender)]
#[case::model(RenderMode::Model)]
#[case::normals(RenderMode::Normals)]
#[case::albedo(RenderMode::Albedo)]
#[case::depth(RenderMode::Depth)]
#[case::position(RenderMode::Position)]
fn test_present_samples_selected_attachment(#[case] mode: RenderMode) {
    let mut test = TestRenderer::new(800, 600, config_with_mode(mode));
    test.populate();
    let (_, commands) = test.frame();

    let present = commands
        .iter()
        .rposition(|c| matches!(c, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == "Present"))
        .unwrap();
    let RecordedCommand::BeginRenderPass { color_loads, .. } = &commands[present] else {
        unreachable!();
    };
    assert!(matches!(color_loads[..], [LoadOp::Load]));

    let textures = commands[present..]
        .iter()
        .find_map(|command| match command {
            RecordedCommand::SetBindGroup { index, bind_group, .. } if *index == set::TEXTURES => {
                Some(*bind_group)
            }
            _ => None,
        })
        .unwrap();
    let entries = test.backend.bind_group_entries(textures).unwrap();
    let expected = test.renderer.gbuffer().view(mode.slot()).unwrap();
    assert!(entries
        .iter()
        .any(|(binding, entry)| *binding == 0 && matches!(entry, BindGroupEntry::Texture(view) if *view == expected)));
}

#[test]
fn test_forward_mode_presents_model_slot() {
    assert_eq!(RenderMode::ForwardRender.slot(), slot::MODEL);
    assert_eq!(RenderMode::Position.slot(), slot::POSITION);
}

#[test]
fn test_bloom_can_be_disabled() {
    let mut test = TestRenderer::new(800, 600, RenderConfig {
        bloom_enabled: false,
        ..Default::default()
    });
    test.populate();
    let (stats, commands) = test.frame();
    assert!(stats.lighting);
    assert!(!stats.bloom);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::GenerateMipmaps(_))));
}

// ============================================================================
// Pipeline state per pass
// ============================================================================

const GEOMETRY_DEPTH: DepthState = DepthState {
    format: DEPTH_FORMAT,
    write: true,
    compare: CompareFunction::Less,
};

const LIGHTING_DEPTH: DepthState = DepthState {
    format: DEPTH_FORMAT,
    write: false,
    compare: CompareFunction::Greater,
};

#[rstest]
#[case::geometry("Geometry Pass", Some(GEOMETRY_DEPTH), None)]
#[case::lighting("Lighting Pass", Some(LIGHTING_DEPTH), None)]
#[case::bright("Bloom Bright Pass", None, None)]
#[case::blur("Bloom Horizontal Blur", None, None)]
#[case::combine("Bloom Combine", None, Some(Blend::Additive))]
#[case::present("Present", None, Some(Blend::Alpha))]
fn test_pass_pipeline_state(#[case] label: &str, #[case] depth: Option<DepthState>, #[case] blend: Option<Blend>) {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    let (_, commands) = test.frame();

    let pipeline = pass_commands(&commands, label)
        .iter()
        .find_map(|command| match command {
            RecordedCommand::SetPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .unwrap();
    let desc = test.backend.pipeline_descriptor(pipeline).unwrap();
    assert_eq!(desc.depth, depth);
    assert_eq!(desc.blend, blend);
}

#[test]
fn test_forward_geometry_is_depth_tested() {
    let mut test = TestRenderer::new(800, 600, config_with_mode(RenderMode::ForwardRender));
    test.populate();
    let (_, commands) = test.frame();
    let pipeline = pass_commands(&commands, "Geometry Pass")
        .iter()
        .find_map(|command| match command {
            RecordedCommand::SetPipeline(pipeline) => Some(*pipeline),
            _ => None,
        })
        .unwrap();
    assert_eq!(test.backend.pipeline_descriptor(pipeline).unwrap().depth, Some(GEOMETRY_DEPTH));
}

// ============================================================================
// Bloom
// ============================================================================

#[test]
fn test_bloom_pass_order() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    let (_, commands) = test.frame();

    let levels = BLOOM_LEVELS as usize;
    let mut expected = vec![
        "Clear Swapchain",
        "Bloom Reset",
        "Geometry Pass",
        "Lighting Pass",
        "Bloom Bright Pass",
    ];
    expected.extend(std::iter::repeat("Bloom Horizontal Blur").take(levels));
    expected.extend(std::iter::repeat("Bloom Vertical Blur").take(levels));
    expected.extend(["Bloom Combine", "Present"]);
    assert_eq!(pass_labels(&commands), expected);

    // Mips are generated between the bright pass and the first blur
    let mipmaps = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::GenerateMipmaps(_)))
        .unwrap();
    let first_blur = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == "Bloom Horizontal Blur"))
        .unwrap();
    assert!(mipmaps < first_blur);
    assert_eq!(
        commands[mipmaps],
        RecordedCommand::GenerateMipmaps(test.renderer.bloom().bright_texture())
    );
    assert!(matches!(commands[mipmaps - 1], RecordedCommand::EndRenderPass));
}

#[test]
fn test_bloom_blur_viewports_follow_levels() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    let (_, commands) = test.frame();

    let mut viewports = Vec::new();
    let mut in_blur = false;
    for command in &commands {
        match command {
            RecordedCommand::BeginRenderPass { label, .. } => {
                in_blur = label.as_deref() == Some("Bloom Horizontal Blur");
            }
            RecordedCommand::SetViewport { width, height, .. } if in_blur => {
                viewports.push((*width as u32, *height as u32));
            }
            _ => {}
        }
    }
    assert_eq!(viewports, test.renderer.bloom().viewport_sizes());
    assert_eq!(viewports[0], (400, 300));
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_frame_size_change_recreates_targets() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    test.populate();
    test.frame();
    let old_model = test.renderer.gbuffer().view(slot::MODEL).unwrap();

    test.backend.resize(1024, 768);
    let (stats, _) = test.frame();
    assert!(stats.presented);
    assert_eq!(test.renderer.gbuffer().size(), (1024, 768));
    assert_eq!(test.renderer.bloom().viewport_sizes()[0], (512, 384));
    assert_ne!(test.renderer.gbuffer().view(slot::MODEL).unwrap(), old_model);
    assert!(test.backend.view_target(old_model).is_none());
}

// ============================================================================
// Hot reload
// ============================================================================

fn touch(path: &std::path::Path) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
}

#[test]
fn test_edited_shader_is_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let shaders = copy_shaders(dir.path());
    let mut test = TestRenderer::with_backend(HeadlessBackend::new(800, 600), &shaders, RenderConfig::default());
    test.populate();
    test.frame();

    let geometry = test.renderer.programs().geometry_pass;
    let old_handle = test.registry.program(geometry).unwrap().handle.unwrap();
    assert!(!test.renderer.pipelines().is_empty());

    // Nothing changed yet
    assert_eq!(test.renderer.reload_programs(&mut test.backend, &mut test.registry), 0);

    std::fs::write(&shaders, format!("{}\n// edited\n", common::SHADER_SOURCE)).unwrap();
    touch(&shaders);
    let reloaded = test.renderer.reload_programs(&mut test.backend, &mut test.registry);
    assert_eq!(reloaded, test.registry.programs().len());

    let new_handle = test.registry.program(geometry).unwrap().handle.unwrap();
    assert_ne!(new_handle, old_handle);
    assert!(!test.backend.is_program_alive(old_handle));
    assert!(test.renderer.pipelines().is_empty());

    let (stats, _) = test.frame();
    assert_eq!(stats.geometry_draws, 1);
    assert!(!test.renderer.pipelines().is_empty());
}

#[test]
fn test_broken_shader_skips_draws() {
    let dir = tempfile::tempdir().unwrap();
    let shaders = copy_shaders(dir.path());
    let mut test = TestRenderer::with_backend(HeadlessBackend::new(800, 600), &shaders, RenderConfig::default());
    test.populate();

    std::fs::write(&shaders, "this is not a shader").unwrap();
    touch(&shaders);
    let (stats, commands) = test.frame();

    assert!(test
        .registry
        .programs()
        .iter()
        .all(|program| program.handle.is_none()));
    assert_eq!(stats.geometry_draws, 0);
    assert!(stats.presented);
    assert!(!commands
        .iter()
        .any(|c| matches!(c, RecordedCommand::DrawIndexed { .. })));
}

// ============================================================================
// Vertex layouts
// ============================================================================

#[test]
fn test_missing_vertex_attribute_aborts_frame() {
    let mut test = TestRenderer::new(800, 600, RenderConfig::default());
    let vertices = [
        ScreenVertex { position: Vec3::ZERO, uv: Vec2::ZERO },
        ScreenVertex { position: Vec3::X, uv: Vec2::X },
        ScreenVertex { position: Vec3::Y, uv: Vec2::Y },
    ];
    let mesh = MeshBuilder::new("flat")
        .add_raw(SubmeshLayout::screen(), bytemuck::cast_slice(&vertices), &[0, 1, 2])
        .build(&mut test.backend)
        .unwrap();
    let mesh = test.registry.add_mesh(mesh);
    let albedo = test
        .registry
        .solid_color_texture(&mut test.backend, [255; 4])
        .unwrap();
    let material = test.registry.add_material(Material::new("white", albedo));
    let model = test.registry.add_model(Model::new("flat", mesh, vec![material]));
    test.scene.add_entity(model, Transform::default());
    test.update();

    let frame = test.backend.begin_frame().unwrap();
    let err = test
        .renderer
        .render(&mut test.backend, &mut test.registry, &mut test.scene, &frame)
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, RenderError::IncompatibleVertexLayout { .. }));
}

#[test]
fn test_empty_scene_still_presents() {
    let mut test = TestRenderer::new(320, 240, RenderConfig::default());
    let (stats, _) = test.frame();
    assert_eq!(stats.geometry_draws, 0);
    assert!(stats.lighting);
    assert!(stats.presented);
    assert_eq!(test.renderer.blocks().global.size, 16);
}

#[test]
fn test_incomplete_gbuffer_skips_deferred_passes() {
    let mut test = TestRenderer::minimized(RenderConfig::default());
    assert_eq!(test.renderer.gbuffer().status(), FramebufferStatus::IncompleteAttachment);
    test.populate();
    test.update();

    test.backend.take_commands();
    let frame = test.backend.begin_frame().unwrap();
    let frame = FrameContext {
        width: 0,
        height: 0,
        ..frame
    };
    let stats = test
        .renderer
        .render(&mut test.backend, &mut test.registry, &mut test.scene, &frame)
        .unwrap();
    test.backend.end_frame().unwrap();

    assert_eq!(stats.geometry_draws, 0);
    assert!(!stats.lighting);
    assert!(!stats.bloom);
    // Nothing to sample, but the swapchain was still cleared
    assert!(!stats.presented);
    assert_eq!(pass_labels(&test.backend.take_commands()), ["Clear Swapchain", "Bloom Reset"]);

    // The first frame with an extent rebuilds the targets
    let (stats, _) = test.frame();
    assert!(test.renderer.gbuffer().status().is_complete());
    assert_eq!(stats.geometry_draws, 1);
    assert!(stats.lighting);
    assert!(stats.presented);
}
