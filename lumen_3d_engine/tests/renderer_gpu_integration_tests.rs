//! Renderer integration tests on the real Vulkan backend
//!
//! All tests require a GPU and are marked with #[ignore]. They share one
//! hidden window (see gpu_test_utils) and run one at a time.
//!
//! Run with: cargo test --test renderer_gpu_integration_tests -- --ignored


use gpu_test_utils::create_test_renderer;
use lumen_3d_engine::lumen3d::render::{
    AttachmentDesc, ClearValue, FrameState, FramebufferDesc, GeometryDesc, GeometryPwn, ImageLayout,
    RenderPassDesc, Renderer, TextureData, TextureDesc, TextureFormat, TexturePwn, TextureUsage,
    ALL_BINDINGS, RING_BUFFER_SIZE,
};
use serial_test::serial;

fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let on = ((i % size) + (i / size)) % 2 == 0;
            if on { [255, 255, 255, 255] } else { [0, 0, 0, 255] }
        })
        .collect()
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_offscreen_frames() {
    let mut renderer = create_test_renderer();

    for _ in 0..5 {
        renderer.begin_frame(false).unwrap();
        renderer.end_frame(false).unwrap();
    }
    assert_eq!(renderer.frame_count(), 5);
    assert_eq!(renderer.stats().draw_calls, 0);

    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_present_clear_frames() {
    let mut renderer = create_test_renderer();

    let render_pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::present(renderer.swapchain_format())],
            depth_attachment: None,
        })
        .unwrap();
    let framebuffer = renderer
        .create_framebuffer(&FramebufferDesc::swapchain(render_pass, None, renderer.swapchain_extent()))
        .unwrap();

    for frame in 0..6 {
        renderer.begin_frame(true).unwrap();
        {
            let mut cmd = renderer.command_buffer().lock();
            let clear = ClearValue::Color([frame as f32 / 6.0, 0.1, 0.2, 1.0]);
            cmd.begin_render_pass(render_pass, framebuffer, &[clear], true).unwrap();
            cmd.end_render_pass().unwrap();
        }
        renderer.end_frame(true).unwrap();
        assert!(renderer.swapchain_buffer_index() < renderer.num_swapchain_buffers());
        renderer.present().unwrap();
    }
    assert_eq!(renderer.frame_count(), 6);

    renderer.delete_framebuffer(framebuffer);
    renderer.delete_render_pass(render_pass);
    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_resize() {
    let mut renderer = create_test_renderer();

    let render_pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::present(renderer.swapchain_format())],
            depth_attachment: None,
        })
        .unwrap();
    let framebuffer = renderer
        .create_framebuffer(&FramebufferDesc::swapchain(render_pass, None, renderer.swapchain_extent()))
        .unwrap();

    // Minimized: deferred, no error
    renderer.resize(0, 0).unwrap();
    renderer.resize(640, 480).unwrap();
    let (width, height) = renderer.swapchain_extent();
    assert!(width > 0 && height > 0);

    // Swapchain framebuffers follow the new images
    renderer.begin_frame(true).unwrap();
    {
        let mut cmd = renderer.command_buffer().lock();
        cmd.begin_render_pass(render_pass, framebuffer, &[ClearValue::Color([0.0; 4])], true)
            .unwrap();
        cmd.end_render_pass().unwrap();
    }
    renderer.end_frame(true).unwrap();
    renderer.present().unwrap();

    assert_eq!(renderer.shutdown(), 0);
}


#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_texture_upload() {
    let mut renderer = create_test_renderer();

    let mut texture = TexturePwn::new();
    texture
        .init(
            &renderer,
            &TextureDesc {
                width: 16,
                height: 16,
                mip_levels: 0,
                data: Some(TextureData::Single(checkerboard(16))),
                ..Default::default()
            },
        )
        .unwrap();
    let info = texture.get().unwrap().info().clone();
    assert_eq!(info.mip_levels, 5);

    // Recorded into a one-time command buffer
    renderer
        .one_time_submit(|cmd| texture.get().unwrap().update_image(1, 0, &checkerboard(8), Some(cmd)))
        .unwrap();

    // Too little data
    assert!(texture.get().unwrap().update_image(0, 0, &[0u8; 4], None).is_err());

    texture.done();
    assert_eq!(renderer.pending_destructions(), 1);
    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_offscreen_render_target() {
    let mut renderer = create_test_renderer();

    let mut target = TexturePwn::new();
    target
        .init(
            &renderer,
            &TextureDesc {
                width: 256,
                height: 256,
                usage: TextureUsage::SampledAndRenderTarget,
                ..Default::default()
            },
        )
        .unwrap();
    let mut depth = TexturePwn::new();
    depth
        .init(
            &renderer,
            &TextureDesc {
                width: 256,
                height: 256,
                format: TextureFormat::D32_FLOAT,
                usage: TextureUsage::DepthStencil,
                ..Default::default()
            },
        )
        .unwrap();

    let render_pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::offscreen(TextureFormat::R8G8B8A8_UNORM)],
            depth_attachment: Some(AttachmentDesc::depth(TextureFormat::D32_FLOAT)),
        })
        .unwrap();
    let framebuffer = {
        let color = [target.get().unwrap()];
        renderer
            .create_framebuffer(&FramebufferDesc {
                render_pass,
                swapchain: false,
                color_attachments: &color,
                depth_attachment: depth.get(),
                width: 256,
                height: 256,
            })
            .unwrap()
    };

    renderer.begin_frame(false).unwrap();
    {
        let mut cmd = renderer.command_buffer().lock();
        cmd.begin_render_pass(
            render_pass,
            framebuffer,
            &[ClearValue::Color([1.0, 0.0, 0.0, 1.0]), ClearValue::DepthStencil { depth: 1.0, stencil: 0 }],
            true,
        )
        .unwrap();
        cmd.end_render_pass().unwrap();
        // Back to an attachment for the next pass
        cmd.pipeline_image_memory_barrier(
            target.get().unwrap(),
            ImageLayout::ShaderReadOnly,
            ImageLayout::ColorAttachment,
            0..1,
            0,
        )
        .unwrap();
    }
    renderer.end_frame(false).unwrap();

    renderer.delete_framebuffer(framebuffer);
    renderer.delete_render_pass(render_pass);
    target.done();
    depth.done();
    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_dynamic_geometry_binds() {
    let mut renderer = create_test_renderer();

    let mut geometry = GeometryPwn::new();
    geometry
        .init(
            &renderer,
            &GeometryDesc {
                layout: Renderer::quad_vertex_layout(),
                dynamic: true,
                ..Default::default()
            },
        )
        .unwrap();
    {
        let geometry = geometry.get().unwrap();
        geometry.create_vertex_buffer(3, 0).unwrap();
        let vertices: [f32; 15] = [
            0.0, -0.5, 0.0, 0.5, 0.0, //
            0.5, 0.5, 0.0, 1.0, 1.0, //
            -0.5, 0.5, 0.0, 0.0, 1.0,
        ];
        geometry
            .update_vertex_buffer(bytemuck::cast_slice(&vertices), 0, None)
            .unwrap();
    }

    // Binding without a render pass is fine; drawing is not
    renderer.begin_frame(false).unwrap();
    {
        let mut cmd = renderer.command_buffer().lock();
        cmd.bind_vertex_buffers(geometry.get().unwrap(), ALL_BINDINGS).unwrap();
    }
    renderer.end_frame(false).unwrap();

    geometry.done();
    assert_eq!(renderer.shutdown(), 0);
}


#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_released_texture_survives_ring() {
    let mut renderer = create_test_renderer();

    let mut texture = TexturePwn::new();
    texture.init(&renderer, &TextureDesc { width: 4, height: 4, ..Default::default() }).unwrap();
    assert_eq!(renderer.live_resources(), 3); // + primary command buffer and quad

    texture.done();
    assert_eq!(renderer.pending_destructions(), 1);

    // Still pending while frames that may use it are in flight
    for _ in 0..RING_BUFFER_SIZE {
        assert_eq!(renderer.pending_destructions(), 1);
        renderer.begin_frame(false).unwrap();
        renderer.end_frame(false).unwrap();
    }
    // Destroyed within the jitter window
    let mut frames = RING_BUFFER_SIZE;
    while renderer.pending_destructions() > 0 {
        assert!(frames <= RING_BUFFER_SIZE + 255, "texture never destroyed");
        renderer.begin_frame(false).unwrap();
        renderer.end_frame(false).unwrap();
        frames += 1;
    }

    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_gpu_shutdown_reports_leaks() {
    let mut renderer = create_test_renderer();

    let mut leaked = TexturePwn::new();
    leaked.init(&renderer, &TextureDesc::default()).unwrap();

    assert_eq!(renderer.shutdown(), 1);
    assert_eq!(renderer.state(), FrameState::Shutdown);
    // Backend already torn down; the handle still releases cleanly
    leaked.done();
    assert!(leaked.is_none());
}
