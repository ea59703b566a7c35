//! GPU tests for VulkanBackend
//!
//! The tests share one hidden window and build a fresh backend each. All of
//! them need a Vulkan-capable GPU and are marked with #[ignore].
//!
//! Run with: cargo test --test vulkan_backend_tests -- --ignored

use lumen_3d_engine::lumen3d::render::{
    BackendKind, CommandBufferDesc, CommandBufferPwn, Config, RenderBackend, Renderer, ShaderCode,
    ShaderDesc, ShaderPwn, ShaderStageCode, TextureDesc, TextureFormat,
};
use lumen_3d_engine_renderer_vulkan::{get_validation_stats, VulkanBackend};
use serial_test::serial;
use std::sync::OnceLock;
use winit::event_loop::EventLoop;
use winit::window::Window;

#[cfg(target_os = "windows")]
use winit::platform::windows::EventLoopBuilderExtWindows;
#[cfg(all(unix, not(target_os = "macos")))]
use winit::platform::x11::EventLoopBuilderExtX11;

static TEST_WINDOW: OnceLock<Window> = OnceLock::new();

/// Hidden 800x600 window shared by every test; its event loop is leaked
#[allow(deprecated)]
fn test_window() -> &'static Window {
    TEST_WINDOW.get_or_init(|| {
        let event_loop = {
            let mut builder = EventLoop::builder();
            #[cfg(any(target_os = "windows", all(unix, not(target_os = "macos"))))]
            builder.with_any_thread(true);
            builder.build().unwrap()
        };
        let window_attrs = Window::default_attributes()
            .with_title("Vulkan Backend Test")
            .with_inner_size(winit::dpi::PhysicalSize::new(800, 600))
            .with_visible(false);
        let window = event_loop.create_window(window_attrs).unwrap();
        std::mem::forget(event_loop);
        window
    })
}

fn create_renderer() -> Renderer {
    let backend = VulkanBackend::new(test_window(), &Config::default()).unwrap();
    Renderer::new(Box::new(backend)).unwrap()
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_backend_creation() {
    let mut backend = VulkanBackend::new(test_window(), &Config::default()).unwrap();

    assert_eq!(backend.kind(), BackendKind::Vulkan);
    assert!(!backend.device_name().is_empty());
    let (width, height) = backend.swapchain_extent();
    assert!(width > 0 && height > 0);
    assert!(backend.num_swapchain_buffers() >= 2);
    assert!(matches!(
        backend.swapchain_format(),
        TextureFormat::B8G8R8A8_SRGB
            | TextureFormat::R8G8B8A8_SRGB
            | TextureFormat::B8G8R8A8_UNORM
            | TextureFormat::R8G8B8A8_UNORM
    ));

    backend.wait_idle().unwrap();
    backend.shutdown();
    // Idempotent
    backend.shutdown();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_resources_require_init() {
    let backend = VulkanBackend::new(test_window(), &Config::default()).unwrap();

    // No frame counter yet
    assert!(backend.create_texture(&TextureDesc::default()).is_err());
    assert!(backend.create_command_buffer(&CommandBufferDesc::default()).is_err());
}


#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_draw_outside_render_pass_fails() {
    let mut renderer = create_renderer();

    renderer.begin_frame(false).unwrap();
    {
        let mut cmd = renderer.command_buffer().lock();
        assert!(cmd.draw(3, 1, 0, 0).is_err());
    }
    renderer.end_frame(false).unwrap();

    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_invalid_spirv_rejected() {
    let mut renderer = create_renderer();

    let mut shader = ShaderPwn::new();
    let result = shader.init(
        &renderer,
        &ShaderDesc {
            name: "garbage".to_string(),
            vertex: ShaderStageCode {
                code: ShaderCode::SpirV(vec![0x0723_0203, 0, 0, 0, 0]),
                entry_point: "main".to_string(),
            },
            fragment: None,
            push_constant_ranges: Vec::new(),
        },
    );
    assert!(result.is_err());
    assert!(shader.is_none());

    // WGSL is for the wgpu backend
    let result = shader.init(
        &renderer,
        &ShaderDesc {
            name: "wgsl".to_string(),
            vertex: ShaderStageCode {
                code: ShaderCode::Wgsl("@vertex fn main() {}".to_string()),
                entry_point: "main".to_string(),
            },
            fragment: None,
            push_constant_ranges: Vec::new(),
        },
    );
    assert!(result.is_err());

    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_one_time_submit_and_wait() {
    let mut renderer = create_renderer();

    let mut cmd = CommandBufferPwn::new();
    cmd.init(&renderer, &CommandBufferDesc { one_time_submit: true }).unwrap();
    {
        let mut guard = cmd.lock();
        guard.begin().unwrap();
        guard.end().unwrap();
        guard.submit_and_wait().unwrap();
        assert!(guard.is_one_time_submit());
    }
    cmd.done();

    assert_eq!(renderer.shutdown(), 0);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_vulkan_clean_run_has_no_validation_errors() {
    let config = Config::default().with_validation(true);
    let backend = VulkanBackend::new(test_window(), &config).unwrap();
    let mut renderer = Renderer::new(Box::new(backend)).unwrap();
    let errors_before = get_validation_stats().errors;

    for _ in 0..3 {
        renderer.begin_frame(false).unwrap();
        renderer.end_frame(false).unwrap();
    }
    renderer.wait_idle().unwrap();

    assert_eq!(get_validation_stats().errors, errors_before);
    assert_eq!(renderer.shutdown(), 0);
}
