//! Resource handles and the graph's resource table entries

use crate::backend::traits::BackingResource;
use crate::backend::types::*;
use crate::render_graph::pool::BackingId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque reference to a graph resource.
///
/// Equality, ordering and hashing only look at the id; the cached name and
/// descriptor are carried along for convenience.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    id: u32,
    name: String,
    desc: ResourceDesc,
}

impl ResourceHandle {
    pub const INVALID_ID: u32 = u32::MAX;

    pub(crate) fn new(id: u32, name: &str, desc: ResourceDesc) -> Self {
        Self {
            id,
            name: name.to_string(),
            desc,
        }
    }

    /// A handle that refers to no resource
    pub fn invalid() -> Self {
        Self {
            id: Self::INVALID_ID,
            name: String::new(),
            desc: ResourceDesc::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn is_valid(&self) -> bool {
        self.id != Self::INVALID_ID
    }

    pub fn reset(&mut self) {
        *self = Self::invalid();
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceHandle {}

impl Hash for ResourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for ResourceHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}#{}", self.name, self.id)
        } else {
            write!(f, "<invalid>")
        }
    }
}

/// Who owns a resource's backing memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOrigin {
    /// Owned and pooled by the graph
    Transient,
    /// Owned by the caller; `initial_state` is the state it is handed over in
    /// and returned to after its last use
    External { initial_state: ResourceState },
}

/// Inclusive range of execution-order positions a resource is live for.
///
/// `None` means no surviving pass touches the resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_pass: Option<usize>,
    pub last_pass: Option<usize>,
}

impl ResourceLifetime {
    pub fn new(first_pass: usize, last_pass: usize) -> Self {
        Self {
            first_pass: Some(first_pass),
            last_pass: Some(last_pass),
        }
    }

    pub fn is_used(&self) -> bool {
        self.first_pass.is_some()
    }

    /// Widen the range so it covers `position`
    pub fn include(&mut self, position: usize) {
        self.first_pass = Some(self.first_pass.map_or(position, |f| f.min(position)));
        self.last_pass = Some(self.last_pass.map_or(position, |l| l.max(position)));
    }

    pub fn contains(&self, position: usize) -> bool {
        match (self.first_pass, self.last_pass) {
            (Some(first), Some(last)) => first <= position && position <= last,
            _ => false,
        }
    }

    pub fn overlaps(&self, other: &ResourceLifetime) -> bool {
        match (
            self.first_pass,
            self.last_pass,
            other.first_pass,
            other.last_pass,
        ) {
            (Some(a0), Some(a1), Some(b0), Some(b1)) => a0 <= b1 && b0 <= a1,
            _ => false,
        }
    }
}

/// Key under which barrier analysis tracks GPU state.
///
/// Aliased transients share one backing object and therefore one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum StateKey {
    Backing(BackingId),
    Resource(u32),
}

/// Resource table entry
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub handle: ResourceHandle,
    pub origin: ResourceOrigin,
    pub lifetime: ResourceLifetime,
    /// Concrete object, `None` for transients no surviving pass uses
    pub backing: Option<BackingResource>,
    /// Whether the backing object served an earlier resource this frame
    pub aliased: bool,
    /// Last state recorded for the backing object, shared by aliased tenants
    pub current_state: ResourceState,
    pub(crate) backing_id: Option<BackingId>,
}

impl ResourceInfo {
    pub(crate) fn transient(handle: ResourceHandle) -> Self {
        Self {
            handle,
            origin: ResourceOrigin::Transient,
            lifetime: ResourceLifetime::default(),
            backing: None,
            aliased: false,
            current_state: ResourceState::Common,
            backing_id: None,
        }
    }

    pub(crate) fn external(
        handle: ResourceHandle,
        backing: BackingResource,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            handle,
            origin: ResourceOrigin::External { initial_state },
            lifetime: ResourceLifetime::default(),
            backing: Some(backing),
            aliased: false,
            current_state: initial_state,
            backing_id: None,
        }
    }

    pub fn desc(&self) -> &ResourceDesc {
        self.handle.desc()
    }

    pub fn is_external(&self) -> bool {
        matches!(self.origin, ResourceOrigin::External { .. })
    }

    pub fn is_transient(&self) -> bool {
        self.origin == ResourceOrigin::Transient
    }

    pub fn is_allocated(&self) -> bool {
        self.backing.is_some()
    }

    /// State the backing object sits in between frames
    pub fn resting_state(&self) -> ResourceState {
        match self.origin {
            ResourceOrigin::External { initial_state } => initial_state,
            ResourceOrigin::Transient => ResourceState::Common,
        }
    }

    pub(crate) fn state_key(&self) -> StateKey {
        match (self.origin, self.backing_id) {
            (ResourceOrigin::Transient, Some(id)) => StateKey::Backing(id),
            _ => StateKey::Resource(self.handle.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn color(name: &str) -> ResourceDesc {
        ResourceDesc::texture_2d(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            ResourceUsage::RENDER_TARGET,
            name,
            1,
        )
    }

    #[test]
    fn test_handle_identity_by_id() {
        let a = ResourceHandle::new(7, "albedo", color("albedo"));
        let b = ResourceHandle::new(7, "renamed", ResourceDesc::buffer(4, ResourceUsage::COPY_DST, "x"));
        let c = ResourceHandle::new(8, "albedo", color("albedo"));

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_invalid_handle() {
        assert!(!ResourceHandle::invalid().is_valid());
        assert!(!ResourceHandle::default().is_valid());

        let mut handle = ResourceHandle::new(1, "depth", color("depth"));
        assert!(handle.is_valid());
        handle.reset();
        assert!(!handle.is_valid());
        assert_eq!(handle.to_string(), "<invalid>");
    }

    #[test]
    fn test_lifetime_include() {
        let mut lifetime = ResourceLifetime::default();
        assert!(!lifetime.is_used());
        assert!(!lifetime.contains(0));

        lifetime.include(3);
        lifetime.include(1);
        assert_eq!(lifetime, ResourceLifetime::new(1, 3));
        assert!(lifetime.contains(2));
        assert!(!lifetime.contains(4));
    }

    #[test]
    fn test_lifetime_overlap() {
        let a = ResourceLifetime::new(0, 1);
        let b = ResourceLifetime::new(2, 3);
        let c = ResourceLifetime::new(1, 2);

        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&ResourceLifetime::default()));
    }
}
