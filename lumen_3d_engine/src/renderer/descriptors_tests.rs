use std::ops::ControlFlow;

use super::*;
use crate::renderer::mock_renderer::MockDescriptorBackend;

type MockDescriptors = Descriptors<MockDescriptorBackend>;

/// UBO at binding 0 (count 1) + sampler array at binding 1 (count 4), capacity 3
fn ubo_and_samplers(capacity: u32) -> MockDescriptors {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, capacity);
    d.set_layout_binding(0, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
    d.set_layout_binding(1, DescriptorType::CombinedImageSampler, 4, ShaderStageFlags::FRAGMENT, None);
    d.end_create_set_layout().unwrap();
    d
}

fn allocate(d: &mut MockDescriptors) -> Result<crate::renderer::mock_renderer::MockDescriptorSet> {
    d.begin_allocate_set(0)?;
    d.buffer_info(0, 7, 256, 0);
    for i in 0..4 {
        d.image_info(1, Some(1), 100 + i, ImageLayout::ShaderReadOnly);
    }
    d.end_allocate_set()
}

// ============================================================================
// Pool sizing
// ============================================================================

#[test]
fn test_pool_sizes_count_times_capacity() {
    let d = ubo_and_samplers(3);

    assert_eq!(
        d.pool_sizes(),
        vec![
            (DescriptorType::CombinedImageSampler, 12),
            (DescriptorType::UniformBuffer, 3),
        ]
    );
    assert_eq!(d.max_sets(), 3);
}

#[test]
fn test_pool_sizes_accumulate_over_sets() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 2);
    d.set_layout_binding(0, DescriptorType::UniformBufferDynamic, 1, ShaderStageFlags::VERTEX_FRAGMENT, None);
    d.end_create_set_layout().unwrap();
    d.begin_create_set_layout(1, 5);
    d.set_layout_binding(0, DescriptorType::UniformBufferDynamic, 1, ShaderStageFlags::FRAGMENT, None);
    d.set_layout_binding(1, DescriptorType::CombinedImageSampler, 2, ShaderStageFlags::FRAGMENT, None);
    d.end_create_set_layout().unwrap();

    assert_eq!(
        d.pool_sizes(),
        vec![
            (DescriptorType::CombinedImageSampler, 10),
            (DescriptorType::UniformBufferDynamic, 7),
        ]
    );
    assert_eq!(d.max_sets(), 7);
    assert_eq!(d.set_layout_count(), 2);
}

#[test]
fn test_complex_capacity_adds_to_every_type_and_max_sets() {
    let mut d = ubo_and_samplers(3);
    d.increase_complex_capacity_by(2);
    d.increase_complex_capacity_by(1);

    assert_eq!(d.complex_capacity(), 3);
    assert_eq!(
        d.pool_sizes(),
        vec![
            (DescriptorType::CombinedImageSampler, 15),
            (DescriptorType::UniformBuffer, 6),
        ]
    );
    assert_eq!(d.max_sets(), 6);

    d.create_pool(false).unwrap();
    let desc = d.pool_desc().unwrap();
    assert_eq!(desc.max_sets, 6);
    assert!(!desc.free_descriptor_set);
}

#[test]
#[should_panic(expected = "descriptor count overflows u32")]
fn test_binding_count_times_capacity_overflow_panics() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 1 << 16);
    d.set_layout_binding(0, DescriptorType::CombinedImageSampler, 1 << 16, ShaderStageFlags::FRAGMENT, None);
}

#[test]
#[should_panic(expected = "descriptor count overflows u32")]
fn test_type_count_accumulation_overflow_panics() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 1 << 31);
    d.set_layout_binding(0, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
    d.set_layout_binding(1, DescriptorType::UniformBuffer, 1, ShaderStageFlags::FRAGMENT, None);
}

#[test]
fn test_max_sets_overflow_rejected_by_create_pool() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 1 << 31);
    d.set_layout_binding(0, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
    d.end_create_set_layout().unwrap();
    d.begin_create_set_layout(1, 1 << 31);
    d.set_layout_binding(0, DescriptorType::CombinedImageSampler, 1, ShaderStageFlags::FRAGMENT, None);
    d.end_create_set_layout().unwrap();

    assert_eq!(d.max_sets(), u32::MAX);
    let result = d.create_pool(false);

    assert!(matches!(result, Err(Error::InitializationFailed(_))));
    assert!(!d.has_pool());
}

#[test]
fn test_complex_capacity_overflow_rejected_by_create_pool() {
    let mut d = ubo_and_samplers(1);
    d.increase_complex_capacity_by(u32::MAX - 1);

    assert!(d.pool_sizes().iter().all(|&(_, n)| n == u32::MAX));
    let result = d.create_pool(false);

    assert!(matches!(result, Err(Error::InitializationFailed(_))));
    assert!(!d.has_pool());
}

#[test]
fn test_create_pool_without_layout_fails() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    let result = d.create_pool(false);

    assert!(matches!(result, Err(Error::InitializationFailed(_))));
    assert!(!d.has_pool());
}

// ============================================================================
// Allocation
// ============================================================================

#[test]
fn test_three_sets_fit_fourth_exhausts_pool() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();

    for _ in 0..3 {
        allocate(&mut d).unwrap();
    }
    let fourth = allocate(&mut d);

    assert!(matches!(fourth, Err(Error::PoolExhausted(_))));
}

#[test]
fn test_complex_capacity_makes_room_for_fourth_set() {
    let mut d = ubo_and_samplers(3);
    d.increase_complex_capacity_by(4);
    d.create_pool(false).unwrap();

    for _ in 0..4 {
        allocate(&mut d).unwrap();
    }
}

#[test]
fn test_failed_allocation_leaves_allocator_usable() {
    let mut d = ubo_and_samplers(1);
    d.create_pool(true).unwrap();

    let first = allocate(&mut d).unwrap();
    assert!(allocate(&mut d).is_err());

    d.free_set(first).unwrap();
    allocate(&mut d).unwrap();
}

#[test]
fn test_writes_reach_backend_in_declaration_order() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();

    let set = allocate(&mut d).unwrap();

    assert_eq!(set.set_number, 0);
    assert_eq!(set.writes.len(), 5);
    assert_eq!(set.writes[0], (0, DescriptorType::UniformBuffer, 7));
    assert_eq!(set.writes[1], (1, DescriptorType::CombinedImageSampler, 100));
    assert_eq!(set.writes[4], (1, DescriptorType::CombinedImageSampler, 103));
}

#[test]
fn test_scratch_buffers_reset_between_allocations() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();

    allocate(&mut d).unwrap();
    d.begin_allocate_set(0).unwrap();
    d.buffer_info(0, 9, 64, 128);
    let set = d.end_allocate_set().unwrap();

    assert_eq!(set.writes, vec![(0, DescriptorType::UniformBuffer, 9)]);
}

#[test]
fn test_unknown_set_number_is_an_error() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();

    assert!(matches!(d.begin_allocate_set(1), Err(Error::InvalidResource(_))));
    // Not left half-open
    allocate(&mut d).unwrap();
}

#[test]
fn test_free_set_requires_free_descriptor_set() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();
    let set = allocate(&mut d).unwrap();

    assert!(matches!(d.free_set(set), Err(Error::InvalidResource(_))));
}

// ============================================================================
// Iteration
// ============================================================================

#[test]
fn test_for_each_visits_bindings_in_order() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 1);
    d.set_layout_binding(3, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
    d.set_layout_binding(0, DescriptorType::CombinedImageSampler, 1, ShaderStageFlags::FRAGMENT, None);
    d.set_layout_binding(1, DescriptorType::StorageBuffer, 1, ShaderStageFlags::FRAGMENT, None);
    d.end_create_set_layout().unwrap();

    let mut seen = Vec::new();
    d.for_each(0, |b| {
        seen.push(b.binding);
        ControlFlow::Continue(())
    });

    assert_eq!(seen, vec![3, 0, 1]);
}

#[test]
fn test_for_each_stops_on_break() {
    let d = ubo_and_samplers(1);

    let mut seen = Vec::new();
    d.for_each(0, |b| {
        seen.push(b.binding);
        ControlFlow::Break(())
    });

    assert_eq!(seen, vec![0]);
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_drop_destroys_pool_and_layouts() {
    let backend = MockDescriptorBackend::new();
    let calls = backend.call_log();
    {
        let mut d = Descriptors::new(backend);
        d.begin_create_set_layout(0, 1);
        d.set_layout_binding(0, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
        d.end_create_set_layout().unwrap();
        d.create_pool(false).unwrap();
    }

    let calls = calls.lock().unwrap();
    assert!(calls.contains(&"destroy_pool".to_string()));
    assert!(calls.contains(&"destroy_set_layout".to_string()));
}

#[test]
fn test_done_allows_redeclaration() {
    let mut d = ubo_and_samplers(3);
    d.increase_complex_capacity_by(1);
    d.create_pool(false).unwrap();

    d.done();

    assert_eq!(d.set_layout_count(), 0);
    assert_eq!(d.complex_capacity(), 0);
    assert!(d.pool_sizes().is_empty());
    d.begin_create_set_layout(0, 1);
    d.set_layout_binding(0, DescriptorType::UniformBuffer, 1, ShaderStageFlags::VERTEX, None);
    d.end_create_set_layout().unwrap();
}

// ============================================================================
// Contract violations
// ============================================================================

#[test]
#[should_panic(expected = "still open")]
fn test_nested_layout_build_panics() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(0, 1);
    d.begin_create_set_layout(1, 1);
}

#[test]
#[should_panic(expected = "declared in order")]
fn test_out_of_order_layout_panics() {
    let mut d = Descriptors::new(MockDescriptorBackend::new());
    d.begin_create_set_layout(1, 1);
}

#[test]
#[should_panic(expected = "is being built")]
fn test_nested_allocation_panics() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();
    d.begin_allocate_set(0).unwrap();
    let _ = d.begin_allocate_set(0);
}

#[test]
#[should_panic(expected = "not part of set layout")]
fn test_write_to_undeclared_binding_panics() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();
    d.begin_allocate_set(0).unwrap();
    d.buffer_info(5, 1, 16, 0);
}

#[test]
#[should_panic(expected = "not a buffer")]
fn test_buffer_write_to_image_binding_panics() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();
    d.begin_allocate_set(0).unwrap();
    d.buffer_info(1, 1, 16, 0);
}

#[test]
#[should_panic(expected = "not an image")]
fn test_image_write_to_buffer_binding_panics() {
    let mut d = ubo_and_samplers(3);
    d.create_pool(false).unwrap();
    d.begin_allocate_set(0).unwrap();
    d.image_info(0, None, 1, ImageLayout::ShaderReadOnly);
}
