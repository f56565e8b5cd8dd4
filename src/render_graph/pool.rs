//! Pool of idle backing objects for transient resources

use crate::backend::traits::BackingResource;
use crate::backend::types::ResourceDesc;

/// Identity of a pooled backing object, stable for the object's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackingId(pub(crate) u32);

#[derive(Debug, Clone)]
struct CachedResource {
    id: BackingId,
    backing: BackingResource,
    size: u64,
}

/// Idle-object statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcePoolStats {
    pub cached_textures: usize,
    pub cached_buffers: usize,
    pub cached_memory: u64,
    /// Requests served from the pool
    pub hits: usize,
    /// Requests that needed a new object
    pub misses: usize,
}

/// Store of backing objects not currently serving a live resource.
///
/// Objects are matched by [`BackingResource::is_compatible`]. Cloning the
/// pool shares the objects, which lets a compile work on a copy and only
/// commit it on success.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    texture_cache: Vec<CachedResource>,
    buffer_cache: Vec<CachedResource>,
    max_cached_resources: usize,
    cached_memory: u64,
    next_id: u32,
    hits: usize,
    misses: usize,
}

impl ResourcePool {
    pub fn new(max_cached_resources: usize) -> Self {
        Self {
            texture_cache: Vec::new(),
            buffer_cache: Vec::new(),
            max_cached_resources,
            cached_memory: 0,
            next_id: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Take a compatible idle object out of the pool
    pub fn acquire(&mut self, desc: &ResourceDesc) -> Option<(BackingId, BackingResource)> {
        let cache = if desc.is_buffer() {
            &mut self.buffer_cache
        } else {
            &mut self.texture_cache
        };

        // Smallest fitting buffer, first matching texture
        let pos = cache
            .iter()
            .enumerate()
            .filter(|(_, cached)| cached.backing.is_compatible(desc))
            .min_by_key(|(_, cached)| cached.size)
            .map(|(pos, _)| pos);

        match pos {
            Some(pos) => {
                let cached = cache.remove(pos);
                self.cached_memory -= cached.size;
                self.hits += 1;
                Some((cached.id, cached.backing))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Assign an identity to a freshly created object
    pub fn register(&mut self) -> BackingId {
        let id = BackingId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Return an object to the pool. Releasing an object that is already
    /// idle is a no-op; the oldest idle object is evicted when full.
    pub fn release(&mut self, id: BackingId, backing: BackingResource) {
        if self.contains(id) {
            return;
        }

        let size = backing.size_in_bytes();
        let is_buffer = matches!(backing, BackingResource::Buffer(_));
        let max = self.max_cached_resources;
        let cache = if is_buffer {
            &mut self.buffer_cache
        } else {
            &mut self.texture_cache
        };

        if max == 0 {
            return;
        }
        if cache.len() >= max {
            let evicted = cache.remove(0);
            self.cached_memory -= evicted.size;
            log::debug!("Resource pool full, evicting {:?}", evicted.id);
        }

        cache.push(CachedResource { id, backing, size });
        self.cached_memory += size;
    }

    pub fn contains(&self, id: BackingId) -> bool {
        self.texture_cache
            .iter()
            .chain(self.buffer_cache.iter())
            .any(|cached| cached.id == id)
    }

    pub fn len(&self) -> usize {
        self.texture_cache.len() + self.buffer_cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_cached_resources(&self) -> usize {
        self.max_cached_resources
    }

    /// Change the cap, evicting the oldest idle objects that no longer fit
    pub fn set_max_cached_resources(&mut self, max: usize) {
        self.max_cached_resources = max;
        for cache in [&mut self.texture_cache, &mut self.buffer_cache] {
            while cache.len() > max {
                let evicted = cache.remove(0);
                self.cached_memory -= evicted.size;
            }
        }
    }

    /// Drop every idle object
    pub fn clear(&mut self) {
        self.texture_cache.clear();
        self.buffer_cache.clear();
        self.cached_memory = 0;
    }

    pub fn stats(&self) -> ResourcePoolStats {
        ResourcePoolStats {
            cached_textures: self.texture_cache.len(),
            cached_buffers: self.buffer_cache.len(),
            cached_memory: self.cached_memory,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::backend::traits::RenderDevice;
    use crate::backend::types::*;

    fn target(width: u32) -> ResourceDesc {
        ResourceDesc::texture_2d(
            width,
            width,
            TextureFormat::Rgba8Unorm,
            ResourceUsage::RENDER_TARGET,
            "target",
            1,
        )
    }

    #[test]
    fn test_acquire_release() {
        let device = DummyDevice::new();
        let mut pool = ResourcePool::new(8);
        let desc = target(128);

        assert!(pool.acquire(&desc).is_none());
        let backing = device.create_resource(&desc).unwrap();
        let id = pool.register();
        pool.release(id, backing.clone());
        assert_eq!(pool.stats().cached_textures, 1);
        assert_eq!(pool.stats().cached_memory, 128 * 128 * 4);

        // Wrong size does not match
        assert!(pool.acquire(&target(64)).is_none());

        let (got_id, got) = pool.acquire(&desc).unwrap();
        assert_eq!(got_id, id);
        assert!(got.same_object(&backing));
        assert!(pool.is_empty());
        assert_eq!(pool.stats().cached_memory, 0);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 2);
    }

    #[test]
    fn test_double_release_ignored() {
        let device = DummyDevice::new();
        let mut pool = ResourcePool::new(8);
        let backing = device.create_resource(&target(32)).unwrap();
        let id = pool.register();
        pool.release(id, backing.clone());
        pool.release(id, backing);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_best_fit_buffer() {
        let device = DummyDevice::new();
        let mut pool = ResourcePool::new(8);
        for size in [4096u32, 512, 1024] {
            let backing = device
                .create_resource(&ResourceDesc::buffer(size, ResourceUsage::SHADER_RESOURCE, "b"))
                .unwrap();
            let id = pool.register();
            pool.release(id, backing);
        }

        let (_, got) = pool
            .acquire(&ResourceDesc::buffer(600, ResourceUsage::SHADER_RESOURCE, "want"))
            .unwrap();
        assert_eq!(got.size_in_bytes(), 1024);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let device = DummyDevice::new();
        let mut pool = ResourcePool::new(2);
        let mut ids = Vec::new();
        for width in [16, 32, 64] {
            let backing = device.create_resource(&target(width)).unwrap();
            let id = pool.register();
            ids.push(id);
            pool.release(id, backing);
        }

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(ids[0]));
        assert!(pool.contains(ids[2]));

        pool.set_max_cached_resources(1);
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(ids[2]));
    }
}
