use std::ops::ControlFlow;

use super::*;
use crate::error::Error;
use crate::renderer::destroy_staging::MAX_JITTER;
use crate::renderer::handle::{ShaderPwn, TexturePwn};
use crate::renderer::mock_renderer::{mock_renderer, shader_desc, MockCommandBuffer, MockGeometry};
use crate::renderer::render_pass::AttachmentDesc;
use crate::renderer::scheduled::ScheduledToken;
use crate::renderer::shader::{DescriptorSetDesc, TextureBinding};
use crate::renderer::texture::{SamplerKind, TextureDesc};

fn calls(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    lock(log).clone()
}

fn run_frame(renderer: &mut Renderer) {
    renderer.begin_frame(true).unwrap();
    renderer.end_frame(true).unwrap();
    renderer.present().unwrap();
}

fn primary_commands(renderer: &Renderer) -> Vec<String> {
    let cmd = renderer.command_buffer();
    let guard = cmd.lock();
    guard.as_any().downcast_ref::<MockCommandBuffer>().unwrap().commands.clone()
}

#[test]
fn test_new_creates_renderer_owned_resources() {
    let (renderer, log) = mock_renderer();

    assert_eq!(renderer.state(), FrameState::Initialized);
    assert_eq!(renderer.backend_kind(), BackendKind::Mock);
    assert_eq!(renderer.live_resources(), 2);
    assert_eq!(renderer.num_frames(), RING_BUFFER_SIZE);
    assert_eq!(calls(&log), vec!["init"]);
}

#[test]
fn test_ring_index_follows_frame_count() {
    let (mut renderer, log) = mock_renderer();

    for frame in 0..7u64 {
        assert_eq!(renderer.frame_count(), frame);
        assert_eq!(renderer.ring_buffer_index(), (frame % RING_BUFFER_SIZE as u64) as usize);
        run_frame(&mut renderer);
    }

    let calls = calls(&log);
    assert_eq!(&calls[1..4], &["begin_frame(0)", "submit(0, 1)", "present(0)"]);
    assert_eq!(&calls[4..7], &["begin_frame(1)", "submit(1, 1)", "present(1)"]);
    assert_eq!(calls[10], "begin_frame(0)");
}

#[test]
fn test_frame_states() {
    let (mut renderer, _log) = mock_renderer();

    renderer.begin_frame(true).unwrap();
    assert_eq!(renderer.state(), FrameState::Recording);
    renderer.end_frame(true).unwrap();
    assert_eq!(renderer.state(), FrameState::Submitted);
    assert_eq!(renderer.frame_count(), 0);
    renderer.present().unwrap();
    assert_eq!(renderer.state(), FrameState::Presented);
    assert_eq!(renderer.frame_count(), 1);
}

#[test]
fn test_offscreen_frame_completes_at_end_frame() {
    let (mut renderer, log) = mock_renderer();

    renderer.begin_frame(false).unwrap();
    renderer.end_frame(false).unwrap();

    assert_eq!(renderer.state(), FrameState::Presented);
    assert_eq!(renderer.frame_count(), 1);
    assert!(!calls(&log).iter().any(|c| c.starts_with("present")));
}

#[test]
#[should_panic(expected = "Renderer::begin_frame() called in state Recording")]
fn test_begin_frame_twice_panics() {
    let (mut renderer, _log) = mock_renderer();
    renderer.begin_frame(true).unwrap();
    let _ = renderer.begin_frame(true);
}

#[test]
#[should_panic(expected = "Renderer::present() called in state Initialized")]
fn test_present_before_end_frame_panics() {
    let (mut renderer, _log) = mock_renderer();
    let _ = renderer.present();
}

#[test]
#[should_panic(expected = "end_frame(present) must match begin_frame(present)")]
fn test_mismatched_present_flag_panics() {
    let (mut renderer, _log) = mock_renderer();
    renderer.begin_frame(false).unwrap();
    let _ = renderer.end_frame(true);
}

#[test]
fn test_deferred_resource_outlives_the_ring() {
    let (mut renderer, _log) = mock_renderer();
    let mut texture = TexturePwn::new();
    texture.init(&renderer, &TextureDesc::default()).unwrap();
    let weak = Arc::downgrade(&texture.ptr().shared().unwrap());

    texture.done();
    for _ in 0..RING_BUFFER_SIZE - 1 {
        run_frame(&mut renderer);
        assert!(weak.upgrade().is_some(), "freed while possibly in flight");
    }

    renderer.frame_counter().set(RING_BUFFER_SIZE as u64 + MAX_JITTER);
    run_frame(&mut renderer);
    assert!(weak.upgrade().is_none());
    assert_eq!(renderer.pending_destructions(), 0);
}

#[test]
fn test_render_pass_deletion_is_deferred() {
    let (mut renderer, log) = mock_renderer();
    let pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::present(TextureFormat::B8G8R8A8_SRGB)],
            depth_attachment: None,
        })
        .unwrap();
    let framebuffer = renderer.create_framebuffer(&FramebufferDesc::swapchain(pass, None, (800, 600))).unwrap();

    renderer.delete_framebuffer(framebuffer);
    renderer.delete_render_pass(pass);
    run_frame(&mut renderer);
    assert!(!calls(&log).iter().any(|c| c.starts_with("delete_")));

    renderer.frame_counter().set(RING_BUFFER_SIZE as u64 + MAX_JITTER);
    run_frame(&mut renderer);
    let calls = calls(&log);
    assert!(calls.contains(&"delete_framebuffer".to_string()));
    assert!(calls.contains(&"delete_render_pass".to_string()));
}

#[test]
fn test_quad_staging_released_at_first_begin_frame() {
    let (mut renderer, _log) = mock_renderer();
    let quad = renderer.quad.get().unwrap().as_any().downcast_ref::<MockGeometry>().unwrap();
    assert_eq!(quad.pending_staging(), 2);

    renderer.begin_frame(true).unwrap();
    let quad = renderer.quad.get().unwrap().as_any().downcast_ref::<MockGeometry>().unwrap();
    assert_eq!(quad.pending_staging(), 0);
    assert_eq!(quad.staging_freed.load(std::sync::atomic::Ordering::Relaxed), 2);
}

#[test]
fn test_deferred_deletion_waits_for_the_slot_fence() {
    let (mut renderer, log) = mock_renderer();
    let pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::present(TextureFormat::B8G8R8A8_SRGB)],
            depth_attachment: None,
        })
        .unwrap();

    renderer.begin_frame(true).unwrap();
    renderer.delete_render_pass(pass);
    renderer.end_frame(true).unwrap();
    // Past any jitter once present() advances the counter
    renderer.frame_counter().set(RING_BUFFER_SIZE as u64 + MAX_JITTER);
    renderer.present().unwrap();
    assert!(
        !calls(&log).iter().any(|c| c == "delete_render_pass"),
        "deleted before the slot fence was waited on"
    );

    renderer.begin_frame(true).unwrap();
    let calls = calls(&log);
    let wait = calls.iter().rposition(|c| c.starts_with("begin_frame")).unwrap();
    let delete = calls.iter().position(|c| c == "delete_render_pass").unwrap();
    assert!(delete > wait, "{:?}", calls);
}

#[test]
fn test_draw_quad_records_indexed_draw() {
    let (mut renderer, _log) = mock_renderer();
    renderer.begin_frame(true).unwrap();
    let (width, height) = renderer.swapchain_extent();
    let pass = renderer
        .create_render_pass(&RenderPassDesc {
            color_attachments: vec![AttachmentDesc::present(renderer.swapchain_format())],
            depth_attachment: None,
        })
        .unwrap();
    let framebuffer = renderer.create_framebuffer(&FramebufferDesc::swapchain(pass, None, (width, height))).unwrap();

    {
        let cmd = renderer.command_buffer();
        let mut cmd = cmd.lock();
        cmd.begin_render_pass(pass, framebuffer, &[glam::Vec4::ZERO.into()], true).unwrap();
        renderer.draw_quad(&mut *cmd).unwrap();
        cmd.end_render_pass().unwrap();
    }
    renderer.end_frame(true).unwrap();

    let commands = primary_commands(&renderer);
    assert_eq!(
        commands,
        vec![
            "begin",
            "begin_render_pass",
            "set_viewport",
            "set_scissor",
            "bind_vertex_buffers(1)",
            "bind_index_buffer(u16)",
            "draw_indexed(6)",
            "end_render_pass",
            "end",
        ]
    );
    assert_eq!(renderer.stats().draw_calls, 1);
    renderer.present().unwrap();
}

#[test]
fn test_enqueued_buffers_are_submitted_after_the_primary() {
    let (mut renderer, log) = mock_renderer();
    let mut extra = CommandBufferPwn::new();
    extra.init(&renderer, &CommandBufferDesc::default()).unwrap();

    renderer.begin_frame(true).unwrap();
    extra.lock().begin().unwrap();
    extra.lock().end().unwrap();
    renderer.enqueue(extra.ptr());
    renderer.end_frame(true).unwrap();
    renderer.present().unwrap();

    assert!(calls(&log).contains(&"submit(0, 2)".to_string()));
}

#[test]
fn test_submitting_an_unended_buffer_fails() {
    let (mut renderer, _log) = mock_renderer();
    let mut extra = CommandBufferPwn::new();
    extra.init(&renderer, &CommandBufferDesc::default()).unwrap();

    renderer.begin_frame(true).unwrap();
    extra.lock().begin().unwrap();
    renderer.enqueue(extra.ptr());
    assert!(renderer.end_frame(true).is_err());
}

#[test]
fn test_one_time_submit_records_and_releases() {
    let (renderer, _log) = mock_renderer();
    let mut recorded = Vec::new();

    renderer
        .one_time_submit(|cmd| {
            let mock = cmd.as_any_mut().downcast_mut::<MockCommandBuffer>().unwrap();
            recorded = mock.commands.clone();
            Ok(())
        })
        .unwrap();

    assert_eq!(recorded, vec!["begin"]);
    assert_eq!(renderer.registries().count::<CommandBufferKind>(), 1);
    assert_eq!(renderer.registries().take_allowed().len(), 1);
}

struct CountingScheduled {
    token: ScheduledToken,
    fired: Arc<Mutex<u32>>,
}

impl Scheduled for CountingScheduled {
    fn update(&mut self, frames: &FrameCounter) -> ControlFlow<()> {
        if self.token.is_scheduled_allowed(frames) {
            *lock(&self.fired) += 1;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

#[test]
fn test_scheduled_objects_polled_on_present() {
    let (mut renderer, _log) = mock_renderer();
    let fired = Arc::new(Mutex::new(0));
    let mut token = ScheduledToken::new();
    token.schedule(renderer.frame_counter(), Some(0));
    let object: Arc<Mutex<dyn Scheduled>> = Arc::new(Mutex::new(CountingScheduled {
        token,
        fired: Arc::clone(&fired),
    }));

    renderer.register_scheduled(&object);
    assert_eq!(renderer.scheduled_count(), 1);

    for _ in 0..RING_BUFFER_SIZE - 1 {
        run_frame(&mut renderer);
        assert_eq!(*lock(&fired), 0);
    }
    run_frame(&mut renderer);
    assert_eq!(*lock(&fired), 1);
    assert_eq!(renderer.scheduled_count(), 0);
}

// ============================================================================
// Shader binding
// ============================================================================

/// One set: 64-byte uniform (256-byte stride), one sampler, `capacity` entries per frame
fn binding_shader(renderer: &Renderer, capacity: u32, complex_capacity: u32) -> ShaderPwn {
    let mut shader = ShaderPwn::new();
    shader.init(renderer, &shader_desc("binding")).unwrap();
    let s = shader.get().unwrap();
    s.create_descriptor_set(
        &DescriptorSetDesc::uniform(0, 64, capacity)
            .with_samplers(vec![SamplerKind::LinearRepeat])
            .with_complex_capacity(complex_capacity),
    )
    .unwrap();
    s.create_pipeline_layout().unwrap();
    shader
}

fn bind(renderer: &Renderer, shader: &ShaderPwn, set_number: u32) -> Result<bool> {
    let mut cmd = renderer.command_buffer().lock();
    cmd.bind_descriptors(shader.get().unwrap(), set_number, &[0u8; 64], None)
}

#[test]
fn test_uniform_capacity_is_per_frame() {
    let (mut renderer, _log) = mock_renderer();
    let shader = binding_shader(&renderer, 2, 0);

    renderer.begin_frame(true).unwrap();
    shader.get().unwrap().begin_bind_descriptors();
    assert!(bind(&renderer, &shader, 0).unwrap());
    assert!(bind(&renderer, &shader, 0).unwrap());
    assert!(!bind(&renderer, &shader, 0).unwrap(), "third entry beyond capacity");
    shader.get().unwrap().end_bind_descriptors();

    let commands = primary_commands(&renderer);
    assert!(commands.contains(&"bind_descriptors(0, default, 0)".to_string()));
    assert!(commands.contains(&"bind_descriptors(0, default, 256)".to_string()));
    renderer.end_frame(true).unwrap();
    renderer.present().unwrap();

    // Slot 1 writes its own region, starting from an empty cursor
    renderer.begin_frame(true).unwrap();
    shader.get().unwrap().begin_bind_descriptors();
    assert!(bind(&renderer, &shader, 0).unwrap());
    shader.get().unwrap().end_bind_descriptors();
    assert!(primary_commands(&renderer).contains(&"bind_descriptors(0, default, 512)".to_string()));
    renderer.end_frame(true).unwrap();
}

#[test]
#[should_panic(expected = "before begin_bind_descriptors")]
fn test_bind_outside_bind_window_panics() {
    let (mut renderer, _log) = mock_renderer();
    let shader = binding_shader(&renderer, 2, 0);

    renderer.begin_frame(true).unwrap();
    let _ = bind(&renderer, &shader, 0);
}

#[test]
fn test_bind_undeclared_set_is_an_error() {
    let (mut renderer, _log) = mock_renderer();
    let shader = binding_shader(&renderer, 2, 0);

    renderer.begin_frame(true).unwrap();
    shader.get().unwrap().begin_bind_descriptors();
    assert!(matches!(bind(&renderer, &shader, 5), Err(Error::InvalidResource(_))));
    assert_eq!(shader.get().unwrap().update_uniform_buffer(5, &[0u8; 64]), None);
    // The declared set is unaffected
    assert!(bind(&renderer, &shader, 0).unwrap());
    shader.get().unwrap().end_bind_descriptors();
    renderer.end_frame(true).unwrap();
}

#[test]
fn test_complex_sets_exhaust_and_recycle() {
    let (mut renderer, _log) = mock_renderer();
    let shader = binding_shader(&renderer, 2, 1);
    let mut texture = TexturePwn::new();
    texture.init(&renderer, &TextureDesc::default()).unwrap();
    let s = shader.get().unwrap();
    let textures = [TextureBinding::new(texture.get().unwrap())];

    let handle = s.bind_descriptor_set_textures(0, &textures).unwrap();
    assert_eq!(handle.set_number, 0);
    assert!(matches!(s.bind_descriptor_set_textures(0, &textures), Err(Error::PoolExhausted(_))));

    renderer.begin_frame(true).unwrap();
    s.begin_bind_descriptors();
    {
        let mut cmd = renderer.command_buffer().lock();
        assert!(cmd.bind_descriptors(s, 0, &[0u8; 64], Some(handle)).unwrap());
    }
    s.end_bind_descriptors();
    assert!(primary_commands(&renderer).contains(&"bind_descriptors(0, complex, 0)".to_string()));
    renderer.end_frame(true).unwrap();

    s.free_descriptor_set(handle).unwrap();
    assert!(matches!(s.free_descriptor_set(handle), Err(Error::InvalidResource(_))));
    let again = s.bind_descriptor_set_textures(0, &textures).unwrap();
    assert_ne!(again.id, handle.id);
}

#[test]
fn test_complex_set_texture_count_must_match_layout() {
    let (renderer, _log) = mock_renderer();
    let shader = binding_shader(&renderer, 2, 4);

    let result = shader.get().unwrap().bind_descriptor_set_textures(0, &[]);
    assert!(matches!(result, Err(Error::InvalidResource(_))));
}

#[test]
fn test_resize_forwards_to_backend() {
    let (mut renderer, log) = mock_renderer();
    renderer.resize(1024, 768).unwrap();

    assert_eq!(renderer.swapchain_extent(), (1024, 768));
    let calls = calls(&log);
    assert_eq!(&calls[calls.len() - 2..], &["wait_idle", "resize(1024, 768)"]);
}

#[test]
fn test_shutdown_without_leaks() {
    let (mut renderer, log) = mock_renderer();
    run_frame(&mut renderer);

    assert_eq!(renderer.shutdown(), 0);
    assert_eq!(renderer.state(), FrameState::Shutdown);
    assert_eq!(renderer.live_resources(), 0);
    assert_eq!(renderer.pending_destructions(), 0);
    assert_eq!(calls(&log).last().map(String::as_str), Some("shutdown"));
}

#[test]
fn test_shutdown_reports_leaked_handles() {
    let (mut renderer, _log) = mock_renderer();
    let mut a = TexturePwn::new();
    let mut b = TexturePwn::new();
    a.init(&renderer, &TextureDesc::default()).unwrap();
    b.init(&renderer, &TextureDesc::default()).unwrap();

    assert_eq!(renderer.shutdown(), 2);
}

#[test]
#[should_panic(expected = "Renderer::shutdown() called in state Recording")]
fn test_shutdown_while_recording_panics() {
    let (mut renderer, _log) = mock_renderer();
    renderer.begin_frame(true).unwrap();
    renderer.shutdown();
}

#[test]
fn test_drop_shuts_down() {
    let (renderer, log) = mock_renderer();
    drop(renderer);
    assert_eq!(calls(&log).last().map(String::as_str), Some("shutdown"));
}
