/// Mock backend for unit tests (no GPU required)
///
/// Implements every backend-facing trait in memory. Command buffers record
/// command names, the descriptor backend enforces pool limits like a real
/// descriptor pool, and the backend logs frame-loop calls so tests can check
/// ordering.

use std::any::Any;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::engine_err;
use crate::error::{Error, Result};
use crate::renderer::backend::{BackendKind, RenderBackend, RendererStats};
use crate::renderer::command_buffer::{
    ClearValue, CommandBuffer, CommandBufferDesc, Rect2D, RecordingState, Viewport,
};
use crate::renderer::descriptors::{
    DescriptorBackend, DescriptorType, DescriptorWrite, Descriptors, PoolDesc, SetLayoutBinding,
    ShaderStageFlags, WriteResource,
};
use crate::renderer::destroy_staging::StagingQueue;
use crate::renderer::frame::FrameCounter;
use crate::renderer::geometry::{Geometry, GeometryDesc, VertexLayout};
use crate::renderer::handle::lock;
use crate::renderer::pipeline::{Pipeline, PipelineDesc, PrimitiveTopology};
use crate::renderer::render_pass::{FramebufferDesc, FramebufferId, RenderPassDesc, RenderPassId};
use crate::renderer::shader::{
    declare_descriptor_set, ComplexSetHandle, DescriptorSetDesc, Shader, ShaderDesc, TextureBinding,
};
use crate::renderer::texture::{ImageLayout, Texture, TextureDesc, TextureFormat, TextureInfo};
use crate::renderer::uniform_ring::UniformRing;

type CallLog = Arc<Mutex<Vec<String>>>;

// ============================================================================
// Mock descriptor backend
// ============================================================================

#[derive(Default)]
pub struct MockDescriptorBackend {
    calls: CallLog,
    next_set: AtomicU64,
}

impl MockDescriptorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: &str) {
        lock(&self.calls).push(call.to_string());
    }
}

#[derive(Debug)]
pub struct MockSetLayout {
    pub set_number: u32,
}

#[derive(Debug)]
pub struct MockDescriptorPool {
    pub desc: PoolDesc,
    remaining: BTreeMap<DescriptorType, u32>,
    sets_remaining: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockDescriptorSet {
    pub id: u64,
    pub set_number: u32,
    /// (binding, type, buffer or view id)
    pub writes: Vec<(u32, DescriptorType, u32)>,
    consumed: Vec<(DescriptorType, u32)>,
}

impl DescriptorBackend for MockDescriptorBackend {
    type SetLayout = MockSetLayout;
    type Pool = MockDescriptorPool;
    type Set = MockDescriptorSet;
    type Buffer = u32;
    type ImageView = u32;
    type Sampler = u32;

    fn create_set_layout(&self, set_number: u32, _bindings: &[SetLayoutBinding<u32>]) -> Result<MockSetLayout> {
        self.record("create_set_layout");
        Ok(MockSetLayout { set_number })
    }

    fn destroy_set_layout(&self, _layout: MockSetLayout) {
        self.record("destroy_set_layout");
    }

    fn create_pool(&self, desc: &PoolDesc) -> Result<MockDescriptorPool> {
        self.record("create_pool");
        Ok(MockDescriptorPool {
            desc: desc.clone(),
            remaining: desc.pool_sizes.iter().copied().collect(),
            sets_remaining: desc.max_sets,
        })
    }

    fn destroy_pool(&self, _pool: MockDescriptorPool) {
        self.record("destroy_pool");
    }

    fn allocate_set(
        &self,
        pool: &mut MockDescriptorPool,
        layout: &MockSetLayout,
        bindings: &[SetLayoutBinding<u32>],
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<MockDescriptorSet> {
        let mut consumed: BTreeMap<DescriptorType, u32> = BTreeMap::new();
        for binding in bindings {
            *consumed.entry(binding.ty).or_insert(0) += binding.count;
        }
        let fits = pool.sets_remaining > 0
            && consumed
                .iter()
                .all(|(ty, n)| pool.remaining.get(ty).copied().unwrap_or(0) >= *n);
        if !fits {
            return Err(Error::PoolExhausted(format!("set {}", layout.set_number)));
        }

        pool.sets_remaining -= 1;
        for (ty, n) in &consumed {
            if let Some(left) = pool.remaining.get_mut(ty) {
                *left -= n;
            }
        }
        self.record("allocate_set");
        Ok(MockDescriptorSet {
            id: self.next_set.fetch_add(1, Ordering::Relaxed),
            set_number: layout.set_number,
            writes: writes
                .iter()
                .map(|w| {
                    let id = match w.resource {
                        WriteResource::Buffer(info) => info.buffer,
                        WriteResource::Image(info) => info.view,
                    };
                    (w.binding, w.ty, id)
                })
                .collect(),
            consumed: consumed.into_iter().collect(),
        })
    }

    fn free_set(&self, pool: &mut MockDescriptorPool, set: MockDescriptorSet) -> Result<()> {
        pool.sets_remaining += 1;
        for (ty, n) in set.consumed {
            *pool.remaining.entry(ty).or_insert(0) += n;
        }
        self.record("free_set");
        Ok(())
    }
}

// ============================================================================
// Mock geometry
// ============================================================================

pub struct MockGeometry {
    layout: VertexLayout,
    index_32bit: bool,
    frames: Arc<FrameCounter>,
    vertex_counts: Mutex<FxHashMap<u32, u32>>,
    index_count: AtomicU32,
    staging: Mutex<StagingQueue<usize>>,
    pub staging_freed: AtomicUsize,
}

impl MockGeometry {
    pub fn new(desc: &GeometryDesc, frames: Arc<FrameCounter>) -> Self {
        Self {
            layout: desc.layout.clone(),
            index_32bit: desc.index_32bit,
            frames,
            vertex_counts: Mutex::new(FxHashMap::default()),
            index_count: AtomicU32::new(0),
            staging: Mutex::new(StagingQueue::new()),
            staging_freed: AtomicUsize::new(0),
        }
    }

    pub fn pending_staging(&self) -> usize {
        lock(&self.staging).len()
    }

    fn upload(&self, size: usize, cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        match cmd {
            Some(cmd) => {
                let Some(mock) = cmd.as_any_mut().downcast_mut::<MockCommandBuffer>() else {
                    return Err(Error::InvalidResource("not a mock command buffer".to_string()));
                };
                mock.state.require_outside_render_pass("copy_buffer")?;
                mock.commands.push("copy_buffer".to_string());
                lock(&self.staging).push(size, &self.frames);
            }
            None => lock(&self.staging).push_completed(size),
        }
        Ok(())
    }
}

impl Geometry for MockGeometry {
    fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn create_vertex_buffer(&self, count: u32, binding: u32) -> Result<()> {
        if self.layout.binding(binding).is_none() {
            return Err(Error::InvalidResource(format!("vertex binding {} not in layout", binding)));
        }
        lock(&self.vertex_counts).insert(binding, count);
        Ok(())
    }

    fn update_vertex_buffer(&self, data: &[u8], binding: u32, cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        let count = lock(&self.vertex_counts).get(&binding).copied();
        let (Some(count), Some(desc)) = (count, self.layout.binding(binding)) else {
            return Err(Error::InvalidResource(format!("vertex buffer {} not created", binding)));
        };
        if data.len() as u64 > count as u64 * desc.stride as u64 {
            return Err(Error::InvalidResource("vertex data larger than buffer".to_string()));
        }
        self.upload(data.len(), cmd)
    }

    fn create_index_buffer(&self, count: u32) -> Result<()> {
        self.index_count.store(count, Ordering::Relaxed);
        Ok(())
    }

    fn update_index_buffer(&self, data: &[u8], cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        if self.index_count.load(Ordering::Relaxed) == 0 {
            return Err(Error::InvalidResource("index buffer not created".to_string()));
        }
        self.upload(data.len(), cmd)
    }

    fn destroy_staging_buffers(&self, frames: &FrameCounter) {
        let freed = lock(&self.staging).take_allowed(frames);
        self.staging_freed.fetch_add(freed.len(), Ordering::Relaxed);
    }

    fn has_32bit_indices(&self) -> bool {
        self.index_32bit
    }

    fn index_count(&self) -> u32 {
        self.index_count.load(Ordering::Relaxed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock texture
// ============================================================================

pub struct MockTexture {
    pub info: TextureInfo,
    pub id: u32,
    frames: Arc<FrameCounter>,
    staging: Mutex<StagingQueue<usize>>,
}

impl MockTexture {
    pub fn new(desc: &TextureDesc, id: u32, frames: Arc<FrameCounter>) -> Self {
        Self {
            info: TextureInfo::from_desc(desc),
            id,
            frames,
            staging: Mutex::new(StagingQueue::new()),
        }
    }
}

impl Texture for MockTexture {
    fn info(&self) -> &TextureInfo {
        &self.info
    }

    fn update_image(&self, mip_level: u32, array_layer: u32, data: &[u8], cmd: Option<&mut dyn CommandBuffer>) -> Result<()> {
        if mip_level >= self.info.mip_levels || array_layer >= self.info.array_layers {
            return Err(Error::InvalidResource(format!(
                "mip {} / layer {} out of range",
                mip_level, array_layer
            )));
        }
        match cmd {
            Some(_) => lock(&self.staging).push(data.len(), &self.frames),
            None => lock(&self.staging).push_completed(data.len()),
        }
        Ok(())
    }

    fn destroy_staging_buffers(&self, frames: &FrameCounter) {
        lock(&self.staging).take_allowed(frames);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock shader
// ============================================================================

struct MockShaderState {
    descriptors: Descriptors<MockDescriptorBackend>,
    rings: Vec<UniformRing>,
    default_sets: Vec<MockDescriptorSet>,
    complex: FxHashMap<u64, MockDescriptorSet>,
    next_complex: u64,
}

pub struct MockShader {
    pub name: String,
    frames: Arc<FrameCounter>,
    binding: AtomicBool,
    state: Mutex<MockShaderState>,
}

/// Uniform buffer offset alignment reported by the mock
pub const MOCK_UNIFORM_ALIGNMENT: u64 = 256;

impl MockShader {
    pub fn new(desc: &ShaderDesc, frames: Arc<FrameCounter>) -> Self {
        Self {
            name: desc.name.clone(),
            frames,
            binding: AtomicBool::new(false),
            state: Mutex::new(MockShaderState {
                descriptors: Descriptors::new(MockDescriptorBackend::new()),
                rings: Vec::new(),
                default_sets: Vec::new(),
                complex: FxHashMap::default(),
                next_complex: 0,
            }),
        }
    }
}

impl Shader for MockShader {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_descriptor_set(&self, desc: &DescriptorSetDesc) -> Result<()> {
        let mut state = lock(&self.state);
        declare_descriptor_set(&mut state.descriptors, desc, |kind| Some(kind as u32))?;
        state
            .rings
            .push(UniformRing::new(desc.uniform_size as u64, desc.capacity, MOCK_UNIFORM_ALIGNMENT));
        Ok(())
    }

    fn create_pipeline_layout(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.descriptors.create_pool(true)?;
        for set_number in 0..state.rings.len() as u32 {
            let range = state.rings[set_number as usize].stride();
            state.descriptors.begin_allocate_set(set_number)?;
            state.descriptors.buffer_info(0, set_number, range, 0);
            let set = state.descriptors.end_allocate_set()?;
            state.default_sets.push(set);
        }
        Ok(())
    }

    fn set_count(&self) -> u32 {
        lock(&self.state).rings.len() as u32
    }

    fn begin_bind_descriptors(&self) {
        let mut state = lock(&self.state);
        for ring in &mut state.rings {
            ring.begin(&self.frames);
        }
        self.binding.store(true, Ordering::Relaxed);
    }

    fn end_bind_descriptors(&self) {
        let mut state = lock(&self.state);
        for ring in &mut state.rings {
            ring.end();
        }
        self.binding.store(false, Ordering::Relaxed);
    }

    fn is_binding_descriptors(&self) -> bool {
        self.binding.load(Ordering::Relaxed)
    }

    fn update_uniform_buffer(&self, set_number: u32, data: &[u8]) -> Option<u32> {
        let mut state = lock(&self.state);
        let ring = state.rings.get_mut(set_number as usize)?;
        assert!(data.len() as u64 <= ring.stride(), "uniform data larger than the declared size");
        ring.next_offset()
    }

    fn bind_descriptor_set_textures(&self, set_number: u32, textures: &[TextureBinding<'_>]) -> Result<ComplexSetHandle> {
        let mut state = lock(&self.state);
        let Some(layout) = state.descriptors.layout_desc(set_number) else {
            return Err(Error::InvalidResource(format!("set {} not declared", set_number)));
        };
        if layout.bindings.len() != textures.len() + 1 {
            return Err(Error::InvalidResource(format!(
                "set {} expects {} textures, got {}",
                set_number,
                layout.bindings.len() - 1,
                textures.len()
            )));
        }

        let Some(range) = state.rings.get(set_number as usize).map(UniformRing::stride) else {
            return Err(Error::InvalidResource(format!("set {} has no uniform ring", set_number)));
        };
        state.descriptors.begin_allocate_set(set_number)?;
        state.descriptors.buffer_info(0, set_number, range, 0);
        for (i, binding) in textures.iter().enumerate() {
            let view = binding
                .texture
                .as_any()
                .downcast_ref::<MockTexture>()
                .map_or(u32::MAX, |t| t.id);
            let sampler = binding.sampler.map(|kind| kind as u32);
            state.descriptors.image_info(i as u32 + 1, sampler, view, ImageLayout::ShaderReadOnly);
        }
        let set = state.descriptors.end_allocate_set()?;

        let id = state.next_complex;
        state.next_complex += 1;
        state.complex.insert(id, set);
        Ok(ComplexSetHandle { set_number, id })
    }

    fn free_descriptor_set(&self, handle: ComplexSetHandle) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(set) = state.complex.remove(&handle.id) else {
            return Err(Error::InvalidResource(format!("unknown complex set {}", handle.id)));
        };
        state.descriptors.free_set(set)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock pipeline
// ============================================================================

pub struct MockPipeline {
    pub topology: PrimitiveTopology,
    pub render_pass: RenderPassId,
}

impl Pipeline for MockPipeline {
    fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    fn render_pass(&self) -> RenderPassId {
        self.render_pass
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Mock command buffer
// ============================================================================

#[derive(Debug, Default)]
pub struct MockCommandBuffer {
    pub commands: Vec<String>,
    pub state: RecordingState,
    one_time: bool,
}

impl MockCommandBuffer {
    pub fn new(one_time: bool) -> Self {
        Self { commands: Vec::new(), state: RecordingState::new(), one_time }
    }

    fn push(&mut self, command: &str) {
        self.commands.push(command.to_string());
    }
}

impl CommandBuffer for MockCommandBuffer {
    fn begin(&mut self) -> Result<()> {
        self.state.begin()?;
        self.commands.clear();
        self.push("begin");
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.state.end()?;
        self.push("end");
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: RenderPassId,
        framebuffer: FramebufferId,
        _clear_values: &[ClearValue],
        set_viewport_and_scissor: bool,
    ) -> Result<()> {
        self.state.begin_render_pass(render_pass, framebuffer)?;
        self.push("begin_render_pass");
        if set_viewport_and_scissor {
            self.push("set_viewport");
            self.push("set_scissor");
        }
        Ok(())
    }

    fn next_subpass(&mut self) -> Result<()> {
        self.state.next_subpass()?;
        self.push("next_subpass");
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.state.end_render_pass()?;
        self.push("end_render_pass");
        Ok(())
    }

    fn bind_vertex_buffers(&mut self, geometry: &dyn Geometry, bindings_filter: u32) -> Result<()> {
        self.state.require_recording("bind_vertex_buffers")?;
        let count = geometry.layout().filtered(bindings_filter).count();
        self.commands.push(format!("bind_vertex_buffers({})", count));
        Ok(())
    }

    fn bind_index_buffer(&mut self, geometry: &dyn Geometry) -> Result<()> {
        self.state.require_recording("bind_index_buffer")?;
        let bits = if geometry.has_32bit_indices() { 32 } else { 16 };
        self.commands.push(format!("bind_index_buffer(u{})", bits));
        Ok(())
    }

    fn bind_pipeline(&mut self, _pipeline: &dyn Pipeline) -> Result<()> {
        self.state.require_recording("bind_pipeline")?;
        self.push("bind_pipeline");
        Ok(())
    }

    fn set_viewport(&mut self, _viewports: &[Viewport]) -> Result<()> {
        self.state.require_recording("set_viewport")?;
        self.push("set_viewport");
        Ok(())
    }

    fn set_scissor(&mut self, _rects: &[Rect2D]) -> Result<()> {
        self.state.require_recording("set_scissor")?;
        self.push("set_scissor");
        Ok(())
    }

    fn set_blend_constants(&mut self, _constants: [f32; 4]) -> Result<()> {
        self.state.require_recording("set_blend_constants")?;
        self.push("set_blend_constants");
        Ok(())
    }

    fn bind_descriptors(
        &mut self,
        shader: &dyn Shader,
        set_number: u32,
        uniform_data: &[u8],
        complex_set: Option<ComplexSetHandle>,
    ) -> Result<bool> {
        self.state.require_recording("bind_descriptors")?;
        if set_number >= shader.set_count() {
            return Err(Error::InvalidResource(format!(
                "bind_descriptors: set {} not declared ({} sets)",
                set_number,
                shader.set_count()
            )));
        }
        if let Some(handle) = complex_set.filter(|h| h.set_number != set_number) {
            return Err(Error::InvalidResource(format!(
                "complex set {} belongs to set {}, bound as set {}",
                handle.id, handle.set_number, set_number
            )));
        }
        let Some(offset) = shader.update_uniform_buffer(set_number, uniform_data) else {
            return Ok(false);
        };
        let which = if complex_set.is_some() { "complex" } else { "default" };
        self.commands.push(format!("bind_descriptors({}, {}, {})", set_number, which, offset));
        Ok(true)
    }

    fn push_constants(&mut self, _shader: &dyn Shader, _stages: ShaderStageFlags, _offset: u32, _data: &[u8]) -> Result<()> {
        self.state.require_recording("push_constants")?;
        self.push("push_constants");
        Ok(())
    }

    fn pipeline_image_memory_barrier(
        &mut self,
        _texture: &dyn Texture,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        mip_levels: Range<u32>,
        _array_layer: u32,
    ) -> Result<()> {
        self.state.require_outside_render_pass("pipeline_image_memory_barrier")?;
        self.commands.push(format!(
            "barrier({:?} -> {:?}, mips {}..{})",
            old_layout, new_layout, mip_levels.start, mip_levels.end
        ));
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32, _instance_count: u32, _first_vertex: u32, _first_instance: u32) -> Result<()> {
        self.state.require_render_pass("draw")?;
        self.commands.push(format!("draw({})", vertex_count));
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        _instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) -> Result<()> {
        self.state.require_render_pass("draw_indexed")?;
        self.commands.push(format!("draw_indexed({})", index_count));
        Ok(())
    }

    fn submit_and_wait(&mut self) -> Result<()> {
        if !self.one_time {
            return Err(engine_err!("lumen3d::Mock", "submit_and_wait() on a ring command buffer"));
        }
        self.state.mark_submitted()?;
        self.push("submit_and_wait");
        Ok(())
    }

    fn is_one_time_submit(&self) -> bool {
        self.one_time
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Mock backend
// ============================================================================

pub struct MockBackend {
    pub log: CallLog,
    frames: Option<Arc<FrameCounter>>,
    render_passes: Mutex<SlotMap<RenderPassId, RenderPassDesc>>,
    framebuffers: Mutex<SlotMap<FramebufferId, (u32, u32)>>,
    next_texture_id: AtomicU32,
    extent: (u32, u32),
    swapchain_index: u32,
    draw_calls: u32,
    fail_textures: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            frames: None,
            render_passes: Mutex::new(SlotMap::with_key()),
            framebuffers: Mutex::new(SlotMap::with_key()),
            next_texture_id: AtomicU32::new(1),
            extent: (800, 600),
            swapchain_index: 0,
            draw_calls: 0,
            fail_textures: false,
        }
    }

    /// Texture creation fails with `OutOfMemory`
    pub fn with_failing_textures(mut self) -> Self {
        self.fail_textures = true;
        self
    }

    /// Shared call log, readable after the backend moved into a renderer
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn render_pass_count(&self) -> usize {
        lock(&self.render_passes).len()
    }

    fn record(&self, call: String) {
        lock(&self.log).push(call);
    }

    fn frames(&self) -> Result<Arc<FrameCounter>> {
        self.frames
            .clone()
            .ok_or_else(|| Error::InitializationFailed("mock backend not initialized".to_string()))
    }
}

impl RenderBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn init(&mut self, frames: Arc<FrameCounter>) -> Result<()> {
        self.frames = Some(frames);
        self.record("init".to_string());
        Ok(())
    }

    fn create_geometry(&self, desc: &GeometryDesc) -> Result<Arc<dyn Geometry>> {
        Ok(Arc::new(MockGeometry::new(desc, self.frames()?)))
    }

    fn create_shader(&self, desc: &ShaderDesc) -> Result<Arc<dyn Shader>> {
        Ok(Arc::new(MockShader::new(desc, self.frames()?)))
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> Result<Arc<dyn Pipeline>> {
        if !lock(&self.render_passes).contains_key(desc.render_pass) {
            return Err(Error::InvalidResource("pipeline render pass does not exist".to_string()));
        }
        Ok(Arc::new(MockPipeline { topology: desc.topology, render_pass: desc.render_pass }))
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<Arc<dyn Texture>> {
        if self.fail_textures {
            return Err(Error::OutOfMemory);
        }
        let id = self.next_texture_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MockTexture::new(desc, id, self.frames()?)))
    }

    fn create_command_buffer(&self, desc: &CommandBufferDesc) -> Result<Arc<Mutex<dyn CommandBuffer>>> {
        Ok(Arc::new(Mutex::new(MockCommandBuffer::new(desc.one_time_submit))))
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<RenderPassId> {
        Ok(lock(&self.render_passes).insert(desc.clone()))
    }

    fn delete_render_pass(&self, id: RenderPassId) {
        lock(&self.render_passes).remove(id);
        self.record("delete_render_pass".to_string());
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId> {
        if !lock(&self.render_passes).contains_key(desc.render_pass) {
            return Err(Error::InvalidResource("framebuffer render pass does not exist".to_string()));
        }
        Ok(lock(&self.framebuffers).insert((desc.width, desc.height)))
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        lock(&self.framebuffers).remove(id);
        self.record("delete_framebuffer".to_string());
    }

    fn begin_frame(&mut self, slot: usize, present: bool) -> Result<()> {
        self.draw_calls = 0;
        if present {
            self.swapchain_index = (self.swapchain_index + 1) % self.num_swapchain_buffers();
        }
        self.record(format!("begin_frame({})", slot));
        Ok(())
    }

    fn submit(&mut self, slot: usize, command_buffers: &[Arc<Mutex<dyn CommandBuffer>>], _present: bool) -> Result<()> {
        for cmd in command_buffers {
            let cmd = lock(cmd);
            let Some(mock) = cmd.as_any().downcast_ref::<MockCommandBuffer>() else {
                return Err(Error::InvalidResource("not a mock command buffer".to_string()));
            };
            if mock.state.is_recording() {
                return Err(engine_err!("lumen3d::Mock", "submit() of a command buffer still recording"));
            }
            self.draw_calls += mock.commands.iter().filter(|c| c.starts_with("draw")).count() as u32;
        }
        self.record(format!("submit({}, {})", slot, command_buffers.len()));
        Ok(())
    }

    fn present(&mut self, slot: usize) -> Result<()> {
        self.record(format!("present({})", slot));
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        self.record("wait_idle".to_string());
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.extent = (width, height);
        self.record(format!("resize({}, {})", width, height));
        Ok(())
    }

    fn swapchain_extent(&self) -> (u32, u32) {
        self.extent
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::B8G8R8A8_SRGB
    }

    fn swapchain_buffer_index(&self) -> u32 {
        self.swapchain_index
    }

    fn num_swapchain_buffers(&self) -> u32 {
        3
    }

    fn stats(&self) -> RendererStats {
        RendererStats { draw_calls: self.draw_calls, triangles: 0, gpu_memory_used: 0 }
    }

    fn shutdown(&mut self) {
        self.record("shutdown".to_string());
    }
}

// ============================================================================
// Test helpers
// ============================================================================

/// Renderer over a fresh [`MockBackend`], plus the backend call log
pub fn mock_renderer() -> (crate::renderer::renderer::Renderer, CallLog) {
    let backend = MockBackend::new();
    let log = backend.call_log();
    match crate::renderer::renderer::Renderer::new(Box::new(backend)) {
        Ok(renderer) => (renderer, log),
        Err(e) => panic!("mock renderer creation failed: {}", e),
    }
}

/// Shader descriptor with placeholder WGSL stages
pub fn shader_desc(name: &str) -> ShaderDesc {
    use crate::renderer::shader::{ShaderCode, ShaderStageCode};

    ShaderDesc {
        name: name.to_string(),
        vertex: ShaderStageCode { code: ShaderCode::Wgsl(String::new()), entry_point: "vs_main".to_string() },
        fragment: Some(ShaderStageCode {
            code: ShaderCode::Wgsl(String::new()),
            entry_point: "fs_main".to_string(),
        }),
        push_constant_ranges: Vec::new(),
    }
}
