//! Owning (`Pwn`) and borrowed (`Ptr`) resource handles
//!
//! Every live backend resource is owned by exactly one `Pwn`. `init` creates
//! the resource through the renderer's backend and registers it; `done` (or
//! drop) unregisters it and queues it for deferred destruction, so the
//! native object outlives every frame that may still reference it.
//!
//! ```text
//! GeometryPwn::init -> backend.create_geometry -> registry insert
//! GeometryPwn::done -> registry remove -> pending (DestroyStaging)
//! Renderer::present -> pending entries whose frame has passed are dropped
//! ```

use std::any::Any;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slotmap::{new_key_type, SlotMap};

use crate::error::Result;
use crate::renderer::command_buffer::{CommandBuffer, CommandBufferDesc};
use crate::renderer::destroy_staging::DestroyStaging;
use crate::renderer::frame::FrameCounter;
use crate::renderer::geometry::{Geometry, GeometryDesc};
use crate::renderer::pipeline::{Pipeline, PipelineDesc};
use crate::renderer::render_pass::{FramebufferId, RenderPassId};
use crate::renderer::renderer::Renderer;
use crate::renderer::shader::{Shader, ShaderDesc};
use crate::renderer::texture::{Texture, TextureDesc};

/// Lock ignoring poisoning (a panicking recorder must not wedge teardown)
pub fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

new_key_type! {
    /// Registry slot of a live resource
    pub struct ResourceKey;
}

type Registry<T> = Mutex<SlotMap<ResourceKey, Arc<T>>>;

/// A kind of resource handled through `Pwn`/`Ptr`
pub trait ResourceKind: 'static {
    type Object: ?Sized + Send + Sync + 'static;

    const NAME: &'static str;

    fn registry(registries: &Registries) -> &Registry<Self::Object>;

    /// Destroy without waiting for the ring (never reached the GPU, or already waited on)
    fn destroy_immediately(_object: &Self::Object) -> bool {
        false
    }
}

pub struct GeometryKind;
pub struct ShaderKind;
pub struct PipelineKind;
pub struct TextureKind;
pub struct CommandBufferKind;

impl ResourceKind for GeometryKind {
    type Object = dyn Geometry;
    const NAME: &'static str = "Geometry";

    fn registry(registries: &Registries) -> &Registry<Self::Object> {
        &registries.geometries
    }
}

impl ResourceKind for ShaderKind {
    type Object = dyn Shader;
    const NAME: &'static str = "Shader";

    fn registry(registries: &Registries) -> &Registry<Self::Object> {
        &registries.shaders
    }
}

impl ResourceKind for PipelineKind {
    type Object = dyn Pipeline;
    const NAME: &'static str = "Pipeline";

    fn registry(registries: &Registries) -> &Registry<Self::Object> {
        &registries.pipelines
    }
}

impl ResourceKind for TextureKind {
    type Object = dyn Texture;
    const NAME: &'static str = "Texture";

    fn registry(registries: &Registries) -> &Registry<Self::Object> {
        &registries.textures
    }
}

impl ResourceKind for CommandBufferKind {
    type Object = Mutex<dyn CommandBuffer>;
    const NAME: &'static str = "CommandBuffer";

    fn registry(registries: &Registries) -> &Registry<Self::Object> {
        &registries.command_buffers
    }

    fn destroy_immediately(object: &Self::Object) -> bool {
        lock(object).is_one_time_submit()
    }
}

/// Object waiting for its safe-to-free frame
pub(crate) enum PendingObject {
    Resource(Box<dyn Any + Send + Sync>),
    RenderPass(RenderPassId),
    Framebuffer(FramebufferId),
}

struct PendingDestruction {
    kind: &'static str,
    object: PendingObject,
    token: DestroyStaging,
}

/// Live resources of every kind plus the deferred-destruction queue
///
/// Shared (through `Arc`) by the renderer and every `Pwn`, so handles can be
/// created and released from streaming threads.
pub struct Registries {
    geometries: Registry<dyn Geometry>,
    shaders: Registry<dyn Shader>,
    pipelines: Registry<dyn Pipeline>,
    textures: Registry<dyn Texture>,
    command_buffers: Registry<Mutex<dyn CommandBuffer>>,
    pending: Mutex<Vec<PendingDestruction>>,
    frames: Arc<FrameCounter>,
}

impl Registries {
    pub(crate) fn new(frames: Arc<FrameCounter>) -> Self {
        Self {
            geometries: Mutex::new(SlotMap::with_key()),
            shaders: Mutex::new(SlotMap::with_key()),
            pipelines: Mutex::new(SlotMap::with_key()),
            textures: Mutex::new(SlotMap::with_key()),
            command_buffers: Mutex::new(SlotMap::with_key()),
            pending: Mutex::new(Vec::new()),
            frames,
        }
    }

    /// Live resources of kind `K`
    pub fn count<K: ResourceKind>(&self) -> usize {
        lock(K::registry(self)).len()
    }

    /// Live resources of every kind, by kind name
    pub fn live_by_kind(&self) -> Vec<(&'static str, usize)> {
        vec![
            (GeometryKind::NAME, self.count::<GeometryKind>()),
            (ShaderKind::NAME, self.count::<ShaderKind>()),
            (PipelineKind::NAME, self.count::<PipelineKind>()),
            (TextureKind::NAME, self.count::<TextureKind>()),
            (CommandBufferKind::NAME, self.count::<CommandBufferKind>()),
        ]
    }

    pub fn live_resources(&self) -> usize {
        self.live_by_kind().iter().map(|(_, n)| n).sum()
    }

    pub fn pending_destructions(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Snapshot of the live objects of kind `K` (taken under the lock, used outside it)
    pub fn snapshot<K: ResourceKind>(&self) -> Vec<Arc<K::Object>> {
        lock(K::registry(self)).values().cloned().collect()
    }

    fn insert<K: ResourceKind>(&self, object: Arc<K::Object>) -> ResourceKey {
        lock(K::registry(self)).insert(object)
    }

    fn remove<K: ResourceKind>(&self, key: ResourceKey) -> Option<Arc<K::Object>> {
        lock(K::registry(self)).remove(key)
    }

    /// Queue `object` for destruction once the ring has moved past the current frame
    pub(crate) fn defer(&self, kind: &'static str, object: PendingObject, immediate: bool) {
        let mut token = DestroyStaging::new();
        if immediate {
            token.allow();
        } else {
            token.schedule(&self.frames);
        }
        lock(&self.pending).push(PendingDestruction { kind, object, token });
    }

    /// Remove and return every pending object whose frame has been reached
    pub(crate) fn take_allowed(&self) -> Vec<(&'static str, PendingObject)> {
        let mut pending = lock(&self.pending);
        let mut allowed = Vec::new();
        let mut i = 0;
        while i < pending.len() {
            if pending[i].token.is_allowed(&self.frames) {
                let entry = pending.swap_remove(i);
                allowed.push((entry.kind, entry.object));
            } else {
                i += 1;
            }
        }
        allowed
    }

    /// Remove every pending object regardless of its frame (after wait idle)
    pub(crate) fn take_all(&self) -> Vec<(&'static str, PendingObject)> {
        lock(&self.pending).drain(..).map(|e| (e.kind, e.object)).collect()
    }
}

// ============================================================================
// Pwn
// ============================================================================

struct Owned<K: ResourceKind> {
    key: ResourceKey,
    object: Arc<K::Object>,
    registries: Arc<Registries>,
}

/// Owning handle: exactly one per live backend resource
///
/// Move-only. Dropping it releases the resource like [`done`](Self::done).
pub struct Pwn<K: ResourceKind> {
    owned: Option<Owned<K>>,
}

impl<K: ResourceKind> Default for Pwn<K> {
    fn default() -> Self {
        Self { owned: None }
    }
}

impl<K: ResourceKind> Pwn<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn assert_empty(&self) {
        assert!(
            self.owned.is_none(),
            "{}Pwn::init() on a handle that already holds a resource",
            K::NAME
        );
    }

    fn install(&mut self, renderer: &Renderer, object: Arc<K::Object>) {
        let registries = Arc::clone(renderer.registries());
        let key = registries.insert::<K>(Arc::clone(&object));
        self.owned = Some(Owned { key, object, registries });
    }

    /// Unregister the resource and queue it for deferred destruction. Idempotent.
    pub fn done(&mut self) {
        if let Some(owned) = self.owned.take() {
            let immediate = K::destroy_immediately(&owned.object);
            let removed = owned.registries.remove::<K>(owned.key);
            debug_assert!(removed.is_some(), "{} missing from its registry", K::NAME);
            drop(removed);
            owned.registries.defer(
                K::NAME,
                PendingObject::Resource(Box::new(owned.object)),
                immediate,
            );
        }
    }

    pub fn is_some(&self) -> bool {
        self.owned.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.owned.is_none()
    }

    /// Backend object, if any
    pub fn get(&self) -> Option<&K::Object> {
        self.owned.as_ref().map(|o| &*o.object)
    }

    /// Non-owning alias (null when this handle is empty)
    pub fn ptr(&self) -> Ptr<'_, K> {
        Ptr {
            object: self.owned.as_ref().map(|o| &o.object),
            _kind: PhantomData,
        }
    }
}

impl<K: ResourceKind> Drop for Pwn<K> {
    fn drop(&mut self) {
        self.done();
    }
}

impl Pwn<GeometryKind> {
    pub fn init(&mut self, renderer: &Renderer, desc: &GeometryDesc) -> Result<()> {
        self.assert_empty();
        let object = renderer.backend().create_geometry(desc)?;
        self.install(renderer, object);
        Ok(())
    }
}

impl Pwn<ShaderKind> {
    pub fn init(&mut self, renderer: &Renderer, desc: &ShaderDesc) -> Result<()> {
        self.assert_empty();
        let object = renderer.backend().create_shader(desc)?;
        self.install(renderer, object);
        Ok(())
    }
}

impl Pwn<PipelineKind> {
    pub fn init(&mut self, renderer: &Renderer, desc: &PipelineDesc<'_>) -> Result<()> {
        self.assert_empty();
        let object = renderer.backend().create_pipeline(desc)?;
        self.install(renderer, object);
        Ok(())
    }
}

impl Pwn<TextureKind> {
    pub fn init(&mut self, renderer: &Renderer, desc: &TextureDesc) -> Result<()> {
        self.assert_empty();
        let object = renderer.backend().create_texture(desc)?;
        self.install(renderer, object);
        Ok(())
    }
}

impl Pwn<CommandBufferKind> {
    pub fn init(&mut self, renderer: &Renderer, desc: &CommandBufferDesc) -> Result<()> {
        self.assert_empty();
        let object = renderer.backend().create_command_buffer(desc)?;
        self.install(renderer, object);
        Ok(())
    }

    /// Lock the command buffer for recording
    ///
    /// # Panics
    ///
    /// If the handle is empty.
    pub fn lock(&self) -> MutexGuard<'_, dyn CommandBuffer> {
        match self.get() {
            Some(cmd) => lock(cmd),
            None => panic!("CommandBufferPwn::lock() on an empty handle"),
        }
    }
}

// ============================================================================
// Ptr
// ============================================================================

/// Borrowed, copyable alias of a `Pwn`
///
/// Dereferencing a null `Ptr` is a contract violation and panics.
pub struct Ptr<'a, K: ResourceKind> {
    object: Option<&'a Arc<K::Object>>,
    _kind: PhantomData<K>,
}

impl<K: ResourceKind> Clone for Ptr<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ResourceKind> Copy for Ptr<'_, K> {}

impl<K: ResourceKind> Default for Ptr<'_, K> {
    fn default() -> Self {
        Self { object: None, _kind: PhantomData }
    }
}

impl<'a, K: ResourceKind> Ptr<'a, K> {
    pub fn is_some(&self) -> bool {
        self.object.is_some()
    }

    pub fn is_none(&self) -> bool {
        self.object.is_none()
    }

    pub fn get(&self) -> Option<&'a K::Object> {
        self.object.map(|arc| &**arc)
    }

    pub(crate) fn shared(&self) -> Option<Arc<K::Object>> {
        self.object.cloned()
    }
}

impl<K: ResourceKind> Deref for Ptr<'_, K> {
    type Target = K::Object;

    fn deref(&self) -> &K::Object {
        match self.object {
            Some(arc) => &**arc,
            None => panic!("null {}Ptr dereferenced", K::NAME),
        }
    }
}

impl<'a> Ptr<'a, CommandBufferKind> {
    /// Lock the command buffer for recording
    pub fn lock(&self) -> MutexGuard<'a, dyn CommandBuffer> {
        match self.get() {
            Some(cmd) => lock(cmd),
            None => panic!("null CommandBufferPtr locked"),
        }
    }
}

pub type GeometryPwn = Pwn<GeometryKind>;
pub type GeometryPtr<'a> = Ptr<'a, GeometryKind>;
pub type ShaderPwn = Pwn<ShaderKind>;
pub type ShaderPtr<'a> = Ptr<'a, ShaderKind>;
pub type PipelinePwn = Pwn<PipelineKind>;
pub type PipelinePtr<'a> = Ptr<'a, PipelineKind>;
pub type TexturePwn = Pwn<TextureKind>;
pub type TexturePtr<'a> = Ptr<'a, TextureKind>;
pub type CommandBufferPwn = Pwn<CommandBufferKind>;
pub type CommandBufferPtr<'a> = Ptr<'a, CommandBufferKind>;

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
