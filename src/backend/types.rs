//! Common types shared between the graph and its backends

use bitflags::bitflags;

/// Kind of GPU resource a descriptor describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceType {
    #[default]
    Texture2D,
    TextureCube,
    Texture3D,
    Buffer,
}

impl ResourceType {
    pub fn is_texture(&self) -> bool {
        !matches!(self, ResourceType::Buffer)
    }
}

bitflags! {
    /// How a resource may be used by passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        /// Bound as a color render target.
        const RENDER_TARGET = 1 << 0;
        /// Bound as a depth/stencil target.
        const DEPTH_STENCIL = 1 << 1;
        /// Sampled or read in a shader.
        const SHADER_RESOURCE = 1 << 2;
        /// Read/written as a storage (UAV) resource.
        const UNORDERED_ACCESS = 1 << 3;
        /// Source of a copy.
        const COPY_SRC = 1 << 4;
        /// Destination of a copy.
        const COPY_DST = 1 << 5;
    }
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// Buffers carry no format
    #[default]
    Unknown,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    Rgb10a2Unorm,
    Depth32Float,
    Depth24PlusStencil8,
    R32Float,
    Rg16Float,
    Rg32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Unknown => 0,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rgb10a2Unorm
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8
            | TextureFormat::R32Float
            | TextureFormat::Rg16Float => 4,
            TextureFormat::Rgba16Float | TextureFormat::Rg32Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// Immutable description of a graph resource.
///
/// Buffers store their byte size in `width`; `height`, `depth`,
/// `mip_levels` and `array_size` stay at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDesc {
    pub ty: ResourceType,
    pub usage: ResourceUsage,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub format: TextureFormat,
    pub debug_name: String,
}

impl Default for ResourceDesc {
    fn default() -> Self {
        Self {
            ty: ResourceType::Texture2D,
            usage: ResourceUsage::empty(),
            width: 0,
            height: 0,
            depth: 1,
            mip_levels: 1,
            array_size: 1,
            format: TextureFormat::Unknown,
            debug_name: String::new(),
        }
    }
}

impl ResourceDesc {
    /// Describe a 2D texture
    pub fn texture_2d(
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: ResourceUsage,
        name: &str,
        mip_levels: u32,
    ) -> Self {
        Self {
            ty: ResourceType::Texture2D,
            usage,
            width,
            height,
            mip_levels,
            format,
            debug_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Describe a cube texture (six array layers)
    pub fn texture_cube(
        size: u32,
        format: TextureFormat,
        usage: ResourceUsage,
        name: &str,
        mip_levels: u32,
    ) -> Self {
        Self {
            ty: ResourceType::TextureCube,
            usage,
            width: size,
            height: size,
            mip_levels,
            array_size: 6,
            format,
            debug_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Describe a volume texture
    pub fn texture_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: TextureFormat,
        usage: ResourceUsage,
        name: &str,
    ) -> Self {
        Self {
            ty: ResourceType::Texture3D,
            usage,
            width,
            height,
            depth,
            format,
            debug_name: name.to_string(),
            ..Default::default()
        }
    }

    /// Describe a buffer of `size` bytes
    pub fn buffer(size: u32, usage: ResourceUsage, name: &str) -> Self {
        Self {
            ty: ResourceType::Buffer,
            usage,
            width: size,
            height: 1,
            debug_name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_texture(&self) -> bool {
        self.ty.is_texture()
    }

    pub fn is_buffer(&self) -> bool {
        self.ty == ResourceType::Buffer
    }

    /// Buffer size in bytes, zero for textures
    pub fn size(&self) -> u64 {
        if self.is_buffer() {
            self.width as u64
        } else {
            0
        }
    }

    /// Rough byte footprint of the resource, including the full mip chain.
    pub fn estimated_size(&self) -> u64 {
        if self.is_buffer() {
            return self.width as u64;
        }

        let bpp = self.format.bytes_per_pixel() as u64;
        let layers = self.array_size.max(1) as u64;
        let mut total = 0u64;
        let (mut w, mut h, mut d) = (self.width as u64, self.height as u64, self.depth as u64);
        for _ in 0..self.mip_levels.max(1) {
            total += w * h * d.max(1) * bpp;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
            if self.ty == ResourceType::Texture3D {
                d = (d / 2).max(1);
            }
        }
        total * layers
    }

    /// Describe what is wrong with this descriptor, if anything.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_buffer() {
            if self.width == 0 {
                return Err("buffer size is zero".to_string());
            }
            return Ok(());
        }

        if self.width == 0 || self.height == 0 {
            return Err(format!(
                "texture dimensions are {}x{}",
                self.width, self.height
            ));
        }
        if self.ty == ResourceType::Texture3D && self.depth == 0 {
            return Err("volume texture depth is zero".to_string());
        }
        if self.mip_levels == 0 || self.array_size == 0 {
            return Err(format!(
                "mip levels ({}) and array size ({}) must be non-zero",
                self.mip_levels, self.array_size
            ));
        }
        Ok(())
    }
}

/// GPU-visible state of a resource, tracked for barrier insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    #[default]
    Common,
    RenderTarget,
    DepthWrite,
    DepthRead,
    ShaderResource,
    UnorderedAccess,
    CopySrc,
    CopyDst,
}

impl ResourceState {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ResourceState::RenderTarget
                | ResourceState::DepthWrite
                | ResourceState::UnorderedAccess
                | ResourceState::CopyDst
        )
    }
}
