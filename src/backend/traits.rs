//! Core backend abstraction traits
//!
//! The graph never talks to a graphics API directly. It needs a device that
//! can create backing objects for a [`ResourceDesc`], backing objects that
//! can report their dimensions, and a command target that accepts state
//! transitions. Everything else stays with the backend.

use crate::backend::types::*;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Capability surface of a concrete texture owned by a backend
pub trait GpuTexture: fmt::Debug + Send + Sync {
    fn resource_type(&self) -> ResourceType;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn depth(&self) -> u32;
    fn mip_levels(&self) -> u32;
    fn array_size(&self) -> u32;
    fn format(&self) -> TextureFormat;
    fn usage(&self) -> ResourceUsage;

    fn debug_name(&self) -> &str {
        ""
    }
}

/// Capability surface of a concrete buffer owned by a backend
pub trait GpuBuffer: fmt::Debug + Send + Sync {
    fn size(&self) -> u64;
    fn usage(&self) -> ResourceUsage;

    fn debug_name(&self) -> &str {
        ""
    }
}

/// A concrete texture or buffer backing a graph resource.
///
/// Cloning shares the underlying object. The GPU memory is released when the
/// last clone (resource table, pool or caller) is dropped.
#[derive(Debug, Clone)]
pub enum BackingResource {
    Texture(Arc<dyn GpuTexture>),
    Buffer(Arc<dyn GpuBuffer>),
}

impl BackingResource {
    pub fn as_texture(&self) -> Option<&Arc<dyn GpuTexture>> {
        match self {
            BackingResource::Texture(t) => Some(t),
            BackingResource::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Arc<dyn GpuBuffer>> {
        match self {
            BackingResource::Buffer(b) => Some(b),
            BackingResource::Texture(_) => None,
        }
    }

    /// Rebuild a descriptor from the object's own capability surface
    pub fn describe(&self) -> ResourceDesc {
        match self {
            BackingResource::Texture(t) => ResourceDesc {
                ty: t.resource_type(),
                usage: t.usage(),
                width: t.width(),
                height: t.height(),
                depth: t.depth(),
                mip_levels: t.mip_levels(),
                array_size: t.array_size(),
                format: t.format(),
                debug_name: t.debug_name().to_string(),
            },
            BackingResource::Buffer(b) => ResourceDesc {
                ty: ResourceType::Buffer,
                usage: b.usage(),
                // Buffer descriptors carry a u32 size
                width: u32::try_from(b.size()).unwrap_or(u32::MAX),
                height: 1,
                debug_name: b.debug_name().to_string(),
                ..Default::default()
            },
        }
    }

    pub fn size_in_bytes(&self) -> u64 {
        match self {
            BackingResource::Buffer(b) => b.size(),
            BackingResource::Texture(_) => self.describe().estimated_size(),
        }
    }

    /// Can this object stand in for a resource described by `desc`?
    ///
    /// Textures must match type, dimensions, mip count, array size and
    /// format. Buffers must be at least as large. Both must support every
    /// requested usage flag.
    pub fn is_compatible(&self, desc: &ResourceDesc) -> bool {
        match self {
            BackingResource::Texture(t) => {
                desc.is_texture()
                    && t.resource_type() == desc.ty
                    && t.width() == desc.width
                    && t.height() == desc.height
                    && t.depth() == desc.depth
                    && t.mip_levels() == desc.mip_levels
                    && t.array_size() == desc.array_size
                    && t.format() == desc.format
                    && t.usage().contains(desc.usage)
            }
            BackingResource::Buffer(b) => {
                desc.is_buffer() && b.size() >= desc.size() && b.usage().contains(desc.usage)
            }
        }
    }

    /// Whether both values share the same underlying object
    pub fn same_object(&self, other: &BackingResource) -> bool {
        self.object_ptr() == other.object_ptr()
    }

    fn object_ptr(&self) -> *const () {
        match self {
            BackingResource::Texture(t) => Arc::as_ptr(t) as *const (),
            BackingResource::Buffer(b) => Arc::as_ptr(b) as *const (),
        }
    }
}

/// Device that creates backing objects for transient graph resources.
///
/// Destruction is implicit: backing objects free their memory on drop.
pub trait RenderDevice: Send + Sync {
    /// Get the device name for logging
    fn name(&self) -> &str;

    /// Create a texture
    fn create_texture(&self, desc: &ResourceDesc) -> BackendResult<Arc<dyn GpuTexture>>;

    /// Create a buffer
    fn create_buffer(&self, desc: &ResourceDesc) -> BackendResult<Arc<dyn GpuBuffer>>;

    /// Create whichever kind of object `desc` asks for
    fn create_resource(&self, desc: &ResourceDesc) -> BackendResult<BackingResource> {
        if desc.is_buffer() {
            self.create_buffer(desc).map(BackingResource::Buffer)
        } else {
            self.create_texture(desc).map(BackingResource::Texture)
        }
    }
}

/// A state transition to record before or after a pass
#[derive(Debug, Clone, Copy)]
pub struct ResourceTransition<'a> {
    pub name: &'a str,
    pub resource: &'a BackingResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Command recording target handed to every pass during execution.
///
/// The graph only records transitions through it; passes downcast it to
/// their concrete backend to record their own work.
pub trait RenderContext: Any {
    /// Record a batch of resource state transitions
    fn resource_barriers(&mut self, transitions: &[ResourceTransition<'_>]);

    /// Allow downcasting
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
