//! Descriptor set layouts, pool sizing and set allocation
//!
//! [`Descriptors`] is written once against the [`DescriptorBackend`] trait and
//! shared by every backend: layouts are declared set by set, the pool is sized
//! from the accumulated per-type counts, and each set is built from buffered
//! writes that reach the backend in a single allocate+write call.
//!
//! ```text
//! begin_create_set_layout(0, 3)
//!     set_layout_binding(0, UniformBufferDynamic, 1, VERTEX, None)
//! end_create_set_layout()
//! create_pool(false)
//! begin_allocate_set(0)
//!     buffer_info(0, ubo, 256, 0)
//! end_allocate_set()  -> set
//! ```

use std::collections::BTreeMap;
use std::ops::ControlFlow;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::renderer::texture::ImageLayout;
use crate::engine_warn;

bitflags! {
    /// Shader stages a binding or push constant range is visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1 << 0;
        const TESSELLATION_CONTROL = 1 << 1;
        const TESSELLATION_EVALUATION = 1 << 2;
        const GEOMETRY = 1 << 3;
        const FRAGMENT = 1 << 4;
        const COMPUTE = 1 << 5;
        const VERTEX_FRAGMENT = Self::VERTEX.bits() | Self::FRAGMENT.bits();
        const ALL_GRAPHICS = Self::VERTEX.bits()
            | Self::TESSELLATION_CONTROL.bits()
            | Self::TESSELLATION_EVALUATION.bits()
            | Self::GEOMETRY.bits()
            | Self::FRAGMENT.bits();
    }
}

/// Kind of resource a descriptor binding holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
}

impl DescriptorType {
    /// Written with [`Descriptors::buffer_info`]
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorType::UniformBuffer
                | DescriptorType::StorageBuffer
                | DescriptorType::UniformBufferDynamic
                | DescriptorType::StorageBufferDynamic
        )
    }

    /// Written with [`Descriptors::image_info`]
    pub fn is_image(self) -> bool {
        !self.is_buffer()
    }

    /// Bound with a dynamic offset at bind time
    pub fn is_dynamic(self) -> bool {
        matches!(self, DescriptorType::UniformBufferDynamic | DescriptorType::StorageBufferDynamic)
    }
}

/// One binding of a set layout
#[derive(Debug, Clone, PartialEq)]
pub struct SetLayoutBinding<S> {
    pub binding: u32,
    pub ty: DescriptorType,
    pub count: u32,
    pub stage_flags: ShaderStageFlags,
    pub immutable_sampler: Option<S>,
}

/// Declared layout of one logical set
#[derive(Debug, Clone)]
pub struct SetLayoutDesc<S> {
    pub bindings: Vec<SetLayoutBinding<S>>,
    pub capacity: u32,
}

/// Pool creation parameters computed by [`Descriptors::create_pool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDesc {
    pub pool_sizes: Vec<(DescriptorType, u32)>,
    pub max_sets: u32,
    /// Individual sets may be returned with `free_set`
    pub free_descriptor_set: bool,
}

/// Buffered buffer write
#[derive(Debug, Clone)]
pub struct BufferInfo<B> {
    pub buffer: B,
    pub offset: u64,
    pub range: u64,
}

/// Buffered image write
#[derive(Debug, Clone)]
pub struct ImageInfo<V, S> {
    pub sampler: Option<S>,
    pub view: V,
    pub layout: ImageLayout,
}

/// Resource of one write, borrowed from the scratch buffers
pub enum WriteResource<'a, B: DescriptorBackend + ?Sized> {
    Buffer(&'a BufferInfo<B::Buffer>),
    Image(&'a ImageInfo<B::ImageView, B::Sampler>),
}

/// One write handed to [`DescriptorBackend::allocate_set`]
pub struct DescriptorWrite<'a, B: DescriptorBackend + ?Sized> {
    pub binding: u32,
    pub ty: DescriptorType,
    pub resource: WriteResource<'a, B>,
}

/// Native side of the descriptor allocator
///
/// Implemented by every backend (Vulkan descriptor pools, wgpu bind-group
/// budgets, the test mock).
pub trait DescriptorBackend {
    type SetLayout;
    type Pool;
    type Set;
    type Buffer: Clone;
    type ImageView: Clone;
    type Sampler: Clone;

    fn create_set_layout(
        &self,
        set_number: u32,
        bindings: &[SetLayoutBinding<Self::Sampler>],
    ) -> Result<Self::SetLayout>;

    fn destroy_set_layout(&self, layout: Self::SetLayout);

    fn create_pool(&self, desc: &PoolDesc) -> Result<Self::Pool>;

    fn destroy_pool(&self, pool: Self::Pool);

    /// Allocate one set from `pool` and apply `writes` to it.
    ///
    /// Must fail with [`Error::PoolExhausted`] when the pool has no room left.
    fn allocate_set(
        &self,
        pool: &mut Self::Pool,
        layout: &Self::SetLayout,
        bindings: &[SetLayoutBinding<Self::Sampler>],
        writes: &[DescriptorWrite<'_, Self>],
    ) -> Result<Self::Set>;

    fn free_set(&self, pool: &mut Self::Pool, set: Self::Set) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum WriteSource {
    Buffer(usize),
    Image(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    ty: DescriptorType,
    source: WriteSource,
}

/// Descriptor allocator for one shader (or any other owner of set layouts)
pub struct Descriptors<B: DescriptorBackend> {
    backend: B,
    type_counts: BTreeMap<DescriptorType, u32>,
    layout_descs: Vec<SetLayoutDesc<B::Sampler>>,
    set_layouts: Vec<B::SetLayout>,
    buffer_infos: Vec<BufferInfo<B::Buffer>>,
    image_infos: Vec<ImageInfo<B::ImageView, B::Sampler>>,
    writes: Vec<PendingWrite>,
    pool: Option<B::Pool>,
    pool_desc: Option<PoolDesc>,
    open_layout: Option<u32>,
    active_set: Option<u32>,
    complex_capacity: u32,
}

impl<B: DescriptorBackend> Descriptors<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            type_counts: BTreeMap::new(),
            layout_descs: Vec::with_capacity(8),
            set_layouts: Vec::with_capacity(8),
            buffer_infos: Vec::with_capacity(8),
            image_infos: Vec::with_capacity(8),
            writes: Vec::with_capacity(8),
            pool: None,
            pool_desc: None,
            open_layout: None,
            active_set: None,
            complex_capacity: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ===== SET LAYOUTS =====

    /// Open the layout of `set_number`, which must be the next undeclared set.
    ///
    /// # Panics
    ///
    /// If another layout is open, or sets are declared out of order.
    pub fn begin_create_set_layout(&mut self, set_number: u32, capacity: u32) {
        assert!(
            self.open_layout.is_none(),
            "begin_create_set_layout({}) while set layout {:?} is still open",
            set_number,
            self.open_layout
        );
        assert_eq!(
            set_number as usize,
            self.layout_descs.len(),
            "set layouts must be declared in order"
        );
        assert!(self.pool.is_none(), "set layouts cannot be added after create_pool");

        self.open_layout = Some(set_number);
        self.layout_descs.push(SetLayoutDesc {
            bindings: Vec::with_capacity(8),
            capacity,
        });
    }

    /// Append a binding to the open layout; the pool grows by `count * capacity` of `ty`.
    pub fn set_layout_binding(
        &mut self,
        binding: u32,
        ty: DescriptorType,
        count: u32,
        stage_flags: ShaderStageFlags,
        immutable_sampler: Option<B::Sampler>,
    ) {
        assert!(self.open_layout.is_some(), "set_layout_binding outside begin/end_create_set_layout");
        let Some(desc) = self.layout_descs.last_mut() else {
            unreachable!("open layout without description");
        };
        assert!(
            desc.bindings.iter().all(|b| b.binding != binding),
            "binding {} declared twice",
            binding
        );

        let entry = self.type_counts.entry(ty).or_insert(0);
        let Some(total) = count.checked_mul(desc.capacity).and_then(|n| n.checked_add(*entry)) else {
            panic!(
                "{:?} descriptor count overflows u32 (binding {} count {} x capacity {})",
                ty, binding, count, desc.capacity
            );
        };
        *entry = total;
        desc.bindings.push(SetLayoutBinding {
            binding,
            ty,
            count,
            stage_flags,
            immutable_sampler,
        });
    }

    /// Create the backend layout object and close the session
    pub fn end_create_set_layout(&mut self) -> Result<()> {
        let Some(set_number) = self.open_layout.take() else {
            panic!("end_create_set_layout without begin_create_set_layout");
        };
        let desc = &self.layout_descs[set_number as usize];
        let layout = self.backend.create_set_layout(set_number, &desc.bindings)?;
        self.set_layouts.push(layout);
        Ok(())
    }

    pub fn set_layout_count(&self) -> usize {
        self.set_layouts.len()
    }

    /// Realized layouts in set order (for pipeline layout creation)
    pub fn set_layouts(&self) -> &[B::SetLayout] {
        &self.set_layouts
    }

    pub fn layout_desc(&self, set_number: u32) -> Option<&SetLayoutDesc<B::Sampler>> {
        self.layout_descs.get(set_number as usize)
    }

    /// Visit the bindings of `set_number` in declaration order until `f` breaks
    pub fn for_each<F>(&self, set_number: u32, mut f: F)
    where
        F: FnMut(&SetLayoutBinding<B::Sampler>) -> ControlFlow<()>,
    {
        let Some(desc) = self.layout_descs.get(set_number as usize) else {
            panic!("for_each on undeclared set {}", set_number);
        };
        for binding in &desc.bindings {
            if f(binding).is_break() {
                break;
            }
        }
    }

    // ===== POOL =====

    /// Reserve `capacity` extra sets for complex (per-material) allocations
    pub fn increase_complex_capacity_by(&mut self, capacity: u32) {
        assert!(self.pool.is_none(), "complex capacity must be set before create_pool");
        let Some(total) = self.complex_capacity.checked_add(capacity) else {
            panic!("complex capacity overflows u32 ({} + {})", self.complex_capacity, capacity);
        };
        self.complex_capacity = total;
    }

    pub fn complex_capacity(&self) -> u32 {
        self.complex_capacity
    }

    /// Per-type descriptor counts the pool is (or will be) created with
    ///
    /// Counts saturate at `u32::MAX`; `create_pool` rejects them instead.
    pub fn pool_sizes(&self) -> Vec<(DescriptorType, u32)> {
        self.type_counts
            .iter()
            .map(|(&ty, &count)| (ty, count.saturating_add(self.complex_capacity)))
            .collect()
    }

    /// Maximum number of sets alive at once (saturating, like `pool_sizes`)
    pub fn max_sets(&self) -> u32 {
        self.checked_max_sets().unwrap_or(u32::MAX)
    }

    fn checked_pool_sizes(&self) -> Option<Vec<(DescriptorType, u32)>> {
        self.type_counts
            .iter()
            .map(|(&ty, &count)| Some((ty, count.checked_add(self.complex_capacity)?)))
            .collect()
    }

    fn checked_max_sets(&self) -> Option<u32> {
        self.layout_descs
            .iter()
            .try_fold(self.complex_capacity, |sum, d| sum.checked_add(d.capacity))
    }

    /// Create the single pool backing every declared set
    pub fn create_pool(&mut self, free_descriptor_set: bool) -> Result<()> {
        assert!(self.open_layout.is_none(), "create_pool while a set layout is open");
        assert!(self.pool.is_none(), "create_pool called twice");
        if self.layout_descs.is_empty() {
            return Err(Error::InitializationFailed(
                "create_pool: no set layout declared".to_string(),
            ));
        }

        let (Some(pool_sizes), Some(max_sets)) = (self.checked_pool_sizes(), self.checked_max_sets()) else {
            return Err(Error::InitializationFailed(format!(
                "create_pool: descriptor counts overflow u32 (complex capacity {})",
                self.complex_capacity
            )));
        };
        let desc = PoolDesc {
            pool_sizes,
            max_sets,
            free_descriptor_set,
        };
        let pool = self.backend.create_pool(&desc)?;
        self.pool = Some(pool);
        self.pool_desc = Some(desc);
        Ok(())
    }

    pub fn pool_desc(&self) -> Option<&PoolDesc> {
        self.pool_desc.as_ref()
    }

    pub fn has_pool(&self) -> bool {
        self.pool.is_some()
    }

    // ===== SET ALLOCATION =====

    /// Start building a set of layout `set_number`
    ///
    /// Errors for an undeclared set; panics when nested or before `create_pool`.
    pub fn begin_allocate_set(&mut self, set_number: u32) -> Result<()> {
        assert!(
            self.active_set.is_none(),
            "begin_allocate_set({}) while set {:?} is being built",
            set_number,
            self.active_set
        );
        assert!(self.pool.is_some(), "begin_allocate_set before create_pool");
        if set_number as usize >= self.set_layouts.len() {
            return Err(Error::InvalidResource(format!(
                "begin_allocate_set: set {} not declared ({} layouts)",
                set_number,
                self.set_layouts.len()
            )));
        }

        self.active_set = Some(set_number);
        self.buffer_infos.clear();
        self.image_infos.clear();
        self.writes.clear();
        Ok(())
    }

    fn active_binding_type(&self, binding: u32) -> DescriptorType {
        let Some(set_number) = self.active_set else {
            panic!("descriptor write outside begin/end_allocate_set");
        };
        let desc = &self.layout_descs[set_number as usize];
        match desc.bindings.iter().find(|b| b.binding == binding) {
            Some(b) => b.ty,
            None => panic!("binding {} is not part of set layout {}", binding, set_number),
        }
    }

    /// Queue a buffer write for `binding`
    pub fn buffer_info(&mut self, binding: u32, buffer: B::Buffer, range: u64, offset: u64) {
        let ty = self.active_binding_type(binding);
        assert!(ty.is_buffer(), "binding {} is {:?}, not a buffer", binding, ty);
        self.buffer_infos.push(BufferInfo { buffer, offset, range });
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Buffer(self.buffer_infos.len() - 1),
        });
    }

    /// Queue an image write for `binding`
    pub fn image_info(
        &mut self,
        binding: u32,
        sampler: Option<B::Sampler>,
        view: B::ImageView,
        layout: ImageLayout,
    ) {
        let ty = self.active_binding_type(binding);
        assert!(ty.is_image(), "binding {} is {:?}, not an image", binding, ty);
        self.image_infos.push(ImageInfo { sampler, view, layout });
        self.writes.push(PendingWrite {
            binding,
            ty,
            source: WriteSource::Image(self.image_infos.len() - 1),
        });
    }

    /// Allocate the set and apply every queued write in one backend call
    pub fn end_allocate_set(&mut self) -> Result<B::Set> {
        let Some(set_number) = self.active_set.take() else {
            panic!("end_allocate_set without begin_allocate_set");
        };

        let writes: Vec<DescriptorWrite<'_, B>> = self
            .writes
            .iter()
            .map(|w| DescriptorWrite {
                binding: w.binding,
                ty: w.ty,
                resource: match w.source {
                    WriteSource::Buffer(i) => WriteResource::Buffer(&self.buffer_infos[i]),
                    WriteSource::Image(i) => WriteResource::Image(&self.image_infos[i]),
                },
            })
            .collect();

        let Some(pool) = self.pool.as_mut() else {
            unreachable!("begin_allocate_set checked the pool");
        };
        let result = self.backend.allocate_set(
            pool,
            &self.set_layouts[set_number as usize],
            &self.layout_descs[set_number as usize].bindings,
            &writes,
        );
        drop(writes);

        self.buffer_infos.clear();
        self.image_infos.clear();
        self.writes.clear();

        if let Err(Error::PoolExhausted(msg)) = &result {
            engine_warn!("lumen3d::Descriptors", "Set {} allocation failed: {}", set_number, msg);
        }
        result
    }

    /// Return a set to the pool (pool must allow freeing individual sets)
    pub fn free_set(&mut self, set: B::Set) -> Result<()> {
        let free_allowed = self.pool_desc.as_ref().is_some_and(|d| d.free_descriptor_set);
        if !free_allowed {
            return Err(Error::InvalidResource(
                "free_set: pool was created without free_descriptor_set".to_string(),
            ));
        }
        let Some(pool) = self.pool.as_mut() else {
            unreachable!("pool_desc implies pool");
        };
        self.backend.free_set(pool, set)
    }

    /// Destroy the pool and every layout; declarations start over afterwards
    pub fn done(&mut self) {
        assert!(self.active_set.is_none(), "done() while a set is being built");
        if let Some(pool) = self.pool.take() {
            self.backend.destroy_pool(pool);
        }
        for layout in self.set_layouts.drain(..) {
            self.backend.destroy_set_layout(layout);
        }
        self.layout_descs.clear();
        self.type_counts.clear();
        self.pool_desc = None;
        self.open_layout = None;
        self.complex_capacity = 0;
    }
}

impl<B: DescriptorBackend> Drop for Descriptors<B> {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            self.backend.destroy_pool(pool);
        }
        for layout in self.set_layouts.drain(..) {
            self.backend.destroy_set_layout(layout);
        }
    }
}

#[cfg(test)]
#[path = "descriptors_tests.rs"]
mod tests;
