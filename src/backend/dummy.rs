//! Dummy backend for testing and headless runs.
//!
//! Nothing touches a GPU. The device hands out descriptor-shaped objects and
//! can be told to run out of memory; the context records every transition
//! and marker so tests can inspect what a frame would have submitted.

use crate::backend::traits::*;
use crate::backend::types::*;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Texture created by [`DummyDevice`]
#[derive(Debug)]
pub struct DummyTexture {
    id: u64,
    desc: ResourceDesc,
}

impl DummyTexture {
    pub fn new(id: u64, desc: ResourceDesc) -> Self {
        Self { id, desc }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl GpuTexture for DummyTexture {
    fn resource_type(&self) -> ResourceType {
        self.desc.ty
    }

    fn width(&self) -> u32 {
        self.desc.width
    }

    fn height(&self) -> u32 {
        self.desc.height
    }

    fn depth(&self) -> u32 {
        self.desc.depth
    }

    fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    fn array_size(&self) -> u32 {
        self.desc.array_size
    }

    fn format(&self) -> TextureFormat {
        self.desc.format
    }

    fn usage(&self) -> ResourceUsage {
        self.desc.usage
    }

    fn debug_name(&self) -> &str {
        &self.desc.debug_name
    }
}

/// Buffer created by [`DummyDevice`]
#[derive(Debug)]
pub struct DummyBuffer {
    id: u64,
    size: u64,
    usage: ResourceUsage,
    name: String,
}

impl DummyBuffer {
    pub fn new(id: u64, size: u64, usage: ResourceUsage, name: &str) -> Self {
        Self {
            id,
            size,
            usage,
            name: name.to_string(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl GpuBuffer for DummyBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn usage(&self) -> ResourceUsage {
        self.usage
    }

    fn debug_name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
struct DummyDeviceState {
    next_id: u64,
    textures_created: usize,
    buffers_created: usize,
    allocation_limit: Option<usize>,
}

/// Device that allocates nothing.
#[derive(Debug, Default)]
pub struct DummyDevice {
    state: Mutex<DummyDeviceState>,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`BackendError::OutOfMemory`] once `limit` objects exist
    pub fn with_allocation_limit(limit: usize) -> Self {
        let device = Self::default();
        device.state.lock().allocation_limit = Some(limit);
        device
    }

    pub fn set_allocation_limit(&self, limit: Option<usize>) {
        self.state.lock().allocation_limit = limit;
    }

    pub fn textures_created(&self) -> usize {
        self.state.lock().textures_created
    }

    pub fn buffers_created(&self) -> usize {
        self.state.lock().buffers_created
    }

    /// Shorthand for wrapping a caller-owned texture, e.g. a swapchain image
    pub fn external_texture(&self, desc: &ResourceDesc) -> Arc<dyn GpuTexture> {
        let mut state = self.state.lock();
        state.next_id += 1;
        Arc::new(DummyTexture::new(state.next_id, desc.clone()))
    }

    /// Shorthand for wrapping a caller-owned buffer
    pub fn external_buffer(&self, size: u64, usage: ResourceUsage, name: &str) -> Arc<dyn GpuBuffer> {
        let mut state = self.state.lock();
        state.next_id += 1;
        Arc::new(DummyBuffer::new(state.next_id, size, usage, name))
    }

    fn reserve(&self) -> BackendResult<u64> {
        let mut state = self.state.lock();
        let created = state.textures_created + state.buffers_created;
        if let Some(limit) = state.allocation_limit {
            if created >= limit {
                return Err(BackendError::OutOfMemory);
            }
        }
        state.next_id += 1;
        Ok(state.next_id)
    }
}

impl RenderDevice for DummyDevice {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn create_texture(&self, desc: &ResourceDesc) -> BackendResult<Arc<dyn GpuTexture>> {
        if !desc.is_texture() {
            return Err(BackendError::TextureCreationFailed(format!(
                "'{}' is not a texture",
                desc.debug_name
            )));
        }
        let id = self.reserve()?;
        self.state.lock().textures_created += 1;
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{}x{}, {:?})",
            desc.debug_name,
            desc.width,
            desc.height,
            desc.depth,
            desc.format
        );
        Ok(Arc::new(DummyTexture::new(id, desc.clone())))
    }

    fn create_buffer(&self, desc: &ResourceDesc) -> BackendResult<Arc<dyn GpuBuffer>> {
        if !desc.is_buffer() {
            return Err(BackendError::BufferCreationFailed(format!(
                "'{}' is not a buffer",
                desc.debug_name
            )));
        }
        let id = self.reserve()?;
        self.state.lock().buffers_created += 1;
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.debug_name,
            desc.size()
        );
        Ok(Arc::new(DummyBuffer::new(
            id,
            desc.size(),
            desc.usage,
            &desc.debug_name,
        )))
    }
}

/// A command recorded by [`DummyContext`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    Barrier {
        resource: String,
        before: ResourceState,
        after: ResourceState,
    },
    /// Free-form marker written by a pass
    Marker(String),
}

/// Command target that records instead of submitting
#[derive(Debug, Default)]
pub struct DummyContext {
    commands: Vec<RecordedCommand>,
}

impl DummyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker(&mut self, text: impl Into<String>) {
        self.commands.push(RecordedCommand::Marker(text.into()));
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn markers(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.iter().filter_map(|c| match c {
            RecordedCommand::Marker(m) => Some(m.as_str()),
            RecordedCommand::Barrier { .. } => None,
        })
    }

    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Barrier { .. }))
            .count()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl RenderContext for DummyContext {
    fn resource_barriers(&mut self, transitions: &[ResourceTransition<'_>]) {
        for t in transitions {
            self.commands.push(RecordedCommand::Barrier {
                resource: t.name.to_string(),
                before: t.before,
                after: t.after,
            });
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_device_creates_matching_objects() {
        let device = DummyDevice::new();
        let desc = ResourceDesc::texture_2d(
            640,
            480,
            TextureFormat::Rgba16Float,
            ResourceUsage::RENDER_TARGET,
            "hdr",
            1,
        );
        let backing = device.create_resource(&desc).unwrap();
        assert!(backing.is_compatible(&desc));
        assert_eq!(backing.describe().width, 640);
        assert_eq!(device.textures_created(), 1);
        assert_eq!(device.buffers_created(), 0);
    }

    #[test]
    fn test_allocation_limit() {
        let device = DummyDevice::with_allocation_limit(1);
        let desc = ResourceDesc::buffer(64, ResourceUsage::SHADER_RESOURCE, "a");
        assert!(device.create_buffer(&desc).is_ok());
        assert_eq!(device.create_buffer(&desc).unwrap_err(), BackendError::OutOfMemory);
    }

    #[test]
    fn test_buffer_compatibility() {
        let device = DummyDevice::new();
        let big = device
            .create_resource(&ResourceDesc::buffer(1024, ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS, "big"))
            .unwrap();

        assert!(big.is_compatible(&ResourceDesc::buffer(512, ResourceUsage::SHADER_RESOURCE, "small")));
        assert!(!big.is_compatible(&ResourceDesc::buffer(2048, ResourceUsage::SHADER_RESOURCE, "huge")));
        assert!(!big.is_compatible(&ResourceDesc::buffer(512, ResourceUsage::COPY_DST, "copy")));
    }

    #[test]
    fn test_same_object() {
        let device = DummyDevice::new();
        let desc = ResourceDesc::buffer(16, ResourceUsage::SHADER_RESOURCE, "b");
        let a = device.create_resource(&desc).unwrap();
        let b = device.create_resource(&desc).unwrap();
        assert!(a.same_object(&a.clone()));
        assert!(!a.same_object(&b));
    }

    #[test]
    fn test_context_records() {
        let device = DummyDevice::new();
        let backing = device
            .create_resource(&ResourceDesc::buffer(16, ResourceUsage::UNORDERED_ACCESS, "b"))
            .unwrap();
        let mut ctx = DummyContext::new();
        ctx.marker("begin");
        ctx.resource_barriers(&[ResourceTransition {
            name: "b",
            resource: &backing,
            before: ResourceState::Common,
            after: ResourceState::UnorderedAccess,
        }]);
        assert_eq!(ctx.barrier_count(), 1);
        assert_eq!(ctx.markers().collect::<Vec<_>>(), vec!["begin"]);
    }
}
