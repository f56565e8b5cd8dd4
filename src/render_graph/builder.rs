//! Fluent declaration API used by passes and client code

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::pass::{PassParameters, ResourceAccess};
use crate::render_graph::resource::ResourceHandle;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// An external object handed to the graph at import time
#[derive(Debug, Clone)]
pub(crate) struct ExternalBinding {
    pub backing: BackingResource,
    pub initial_state: ResourceState,
}

#[derive(Debug, Clone)]
pub(crate) struct DeclaredResource {
    pub handle: ResourceHandle,
    pub external: Option<ExternalBinding>,
}

/// Everything declared for one pass
#[derive(Debug, Clone, Default)]
pub(crate) struct PassDeclarations {
    pub inputs: BTreeMap<String, ResourceHandle>,
    pub outputs: BTreeMap<String, ResourceHandle>,
    pub accesses: BTreeMap<u32, ResourceAccess>,
    pub params: PassParameters,
}

impl PassDeclarations {
    fn access(&mut self, handle: &ResourceHandle, access: ResourceAccess) {
        self.accesses
            .entry(handle.id())
            .and_modify(|a| *a = a.combine(access))
            .or_insert(access);
    }

    fn merge(&mut self, other: PassDeclarations) {
        self.inputs.extend(other.inputs);
        self.outputs.extend(other.outputs);
        for (id, access) in other.accesses {
            self.accesses
                .entry(id)
                .and_modify(|a| *a = a.combine(access))
                .or_insert(access);
        }
        self.params.merge(other.params);
    }
}

/// Resource and dependency tables filled by a [`GraphBuilder`]
#[derive(Debug, Clone, Default)]
pub(crate) struct Declarations {
    pub resources: BTreeMap<u32, DeclaredResource>,
    pub passes: BTreeMap<String, PassDeclarations>,
    pub final_outputs: BTreeSet<u32>,
}

struct OpenPass {
    name: String,
    decls: PassDeclarations,
}

/// Declares resources and per-pass dependencies.
///
/// Dependencies go to the pass context opened with [`begin_pass`](Self::begin_pass)
/// unless a pass name is given explicitly. Misuse (an invalid handle, a
/// declaration with no pass context) is logged and ignored.
pub struct GraphBuilder<'a> {
    decls: &'a mut Declarations,
    next_resource_id: &'a mut u32,
    current: Option<OpenPass>,
}

impl<'a> GraphBuilder<'a> {
    pub(crate) fn new(decls: &'a mut Declarations, next_resource_id: &'a mut u32) -> Self {
        Self {
            decls,
            next_resource_id,
            current: None,
        }
    }

    /// Next unused id, or `None` once the counter reaches the invalid sentinel
    fn allocate_id(&mut self) -> Option<u32> {
        let id = *self.next_resource_id;
        if id == ResourceHandle::INVALID_ID {
            return None;
        }
        *self.next_resource_id = id.checked_add(1)?;
        Some(id)
    }

    fn register(&mut self, name: &str, mut desc: ResourceDesc, external: Option<ExternalBinding>) -> ResourceHandle {
        if desc.debug_name.is_empty() {
            desc.debug_name = name.to_string();
        }
        let Some(id) = self.allocate_id() else {
            log::warn!("Resource ids exhausted, cannot declare '{}'", name);
            return ResourceHandle::invalid();
        };
        let handle = ResourceHandle::new(id, name, desc);
        log::debug!(
            "Declared {} resource {} ({:?})",
            if external.is_some() { "external" } else { "transient" },
            handle,
            handle.desc().ty
        );
        self.decls.resources.insert(
            id,
            DeclaredResource {
                handle: handle.clone(),
                external,
            },
        );
        handle
    }

    /// Create a new transient texture
    pub fn create_texture(&mut self, name: &str, desc: ResourceDesc) -> ResourceHandle {
        if !desc.is_texture() {
            log::warn!("create_texture('{}') called with a buffer descriptor", name);
            return ResourceHandle::invalid();
        }
        self.register(name, desc, None)
    }

    /// Create a new transient buffer
    pub fn create_buffer(&mut self, name: &str, desc: ResourceDesc) -> ResourceHandle {
        if !desc.is_buffer() {
            log::warn!("create_buffer('{}') called with a texture descriptor", name);
            return ResourceHandle::invalid();
        }
        self.register(name, desc, None)
    }

    /// Register a caller-owned texture. The graph never pools, aliases or
    /// destroys it, and hands it back in `initial_state` after its last use.
    pub fn import_texture(
        &mut self,
        name: &str,
        texture: Arc<dyn GpuTexture>,
        initial_state: ResourceState,
    ) -> ResourceHandle {
        let backing = BackingResource::Texture(texture);
        let desc = backing.describe();
        self.register(
            name,
            desc,
            Some(ExternalBinding {
                backing,
                initial_state,
            }),
        )
    }

    /// Register a caller-owned buffer
    pub fn import_buffer(
        &mut self,
        name: &str,
        buffer: Arc<dyn GpuBuffer>,
        initial_state: ResourceState,
    ) -> ResourceHandle {
        let backing = BackingResource::Buffer(buffer);
        let desc = backing.describe();
        self.register(
            name,
            desc,
            Some(ExternalBinding {
                backing,
                initial_state,
            }),
        )
    }

    /// RGBA8 color target usable as render target and shader resource
    pub fn create_color_target(&mut self, name: &str, width: u32, height: u32) -> ResourceHandle {
        self.create_color_target_with_format(name, width, height, TextureFormat::Rgba8Unorm)
    }

    pub fn create_color_target_with_format(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> ResourceHandle {
        let desc = ResourceDesc::texture_2d(
            width,
            height,
            format,
            ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE,
            name,
            1,
        );
        self.create_texture(name, desc)
    }

    /// 32-bit float depth target usable as depth/stencil and shader resource
    pub fn create_depth_target(&mut self, name: &str, width: u32, height: u32) -> ResourceHandle {
        self.create_depth_target_with_format(name, width, height, TextureFormat::Depth32Float)
    }

    pub fn create_depth_target_with_format(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> ResourceHandle {
        let desc = ResourceDesc::texture_2d(
            width,
            height,
            format,
            ResourceUsage::DEPTH_STENCIL | ResourceUsage::SHADER_RESOURCE,
            name,
            1,
        );
        self.create_texture(name, desc)
    }

    pub fn create_constant_buffer(&mut self, name: &str, size: u32) -> ResourceHandle {
        let desc = ResourceDesc::buffer(size, ResourceUsage::SHADER_RESOURCE, name);
        self.create_buffer(name, desc)
    }

    /// Buffer of `element_count` elements of `element_size` bytes each
    pub fn create_structured_buffer(
        &mut self,
        name: &str,
        element_size: u32,
        element_count: u32,
    ) -> ResourceHandle {
        let Some(size) = element_size.checked_mul(element_count) else {
            log::warn!(
                "Structured buffer '{}' is too large ({} x {} bytes)",
                name,
                element_count,
                element_size
            );
            return ResourceHandle::invalid();
        };
        let desc = ResourceDesc::buffer(
            size,
            ResourceUsage::SHADER_RESOURCE | ResourceUsage::UNORDERED_ACCESS,
            name,
        );
        self.create_buffer(name, desc)
    }

    /// Declare a read of `handle` by `pass`, or by the open pass context
    pub fn read(&mut self, handle: &ResourceHandle, pass: Option<&str>) {
        self.declare("read", handle, pass, |decls, h| {
            decls.inputs.insert(h.name().to_string(), h.clone());
            decls.access(h, ResourceAccess::Read);
        });
    }

    /// Declare a write of `handle` by `pass`, or by the open pass context
    pub fn write(&mut self, handle: &ResourceHandle, pass: Option<&str>) {
        self.declare("write", handle, pass, |decls, h| {
            decls.outputs.insert(h.name().to_string(), h.clone());
            decls.access(h, ResourceAccess::Write);
        });
    }

    pub fn read_write(&mut self, handle: &ResourceHandle, pass: Option<&str>) {
        self.declare("read_write", handle, pass, |decls, h| {
            decls.inputs.insert(h.name().to_string(), h.clone());
            decls.outputs.insert(h.name().to_string(), h.clone());
            decls.access(h, ResourceAccess::ReadWrite);
        });
    }

    /// Read `handle` in the open pass and bind it under `name`
    pub fn add_input(&mut self, name: &str, handle: &ResourceHandle) {
        self.declare("add_input", handle, None, |decls, h| {
            decls.inputs.insert(name.to_string(), h.clone());
            decls.access(h, ResourceAccess::Read);
        });
    }

    /// Write `handle` in the open pass and bind it under `name`
    pub fn add_output(&mut self, name: &str, handle: &ResourceHandle) {
        self.declare("add_output", handle, None, |decls, h| {
            decls.outputs.insert(name.to_string(), h.clone());
            decls.access(h, ResourceAccess::Write);
        });
    }

    fn declare(
        &mut self,
        op: &str,
        handle: &ResourceHandle,
        pass: Option<&str>,
        apply: impl FnOnce(&mut PassDeclarations, &ResourceHandle),
    ) {
        if !handle.is_valid() {
            log::warn!("{}: ignoring invalid resource handle", op);
            return;
        }

        match pass {
            Some(name) => match &mut self.current {
                Some(open) if open.name == name => apply(&mut open.decls, handle),
                _ => apply(self.decls.passes.entry(name.to_string()).or_default(), handle),
            },
            None => match &mut self.current {
                Some(open) => apply(&mut open.decls, handle),
                None => log::warn!("{}({}): no pass context is open", op, handle),
            },
        }
    }

    fn params_mut(&mut self, op: &str, name: &str) -> Option<&mut PassParameters> {
        match &mut self.current {
            Some(open) => Some(&mut open.decls.params),
            None => {
                log::warn!("{}('{}'): no pass context is open", op, name);
                None
            }
        }
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        if let Some(params) = self.params_mut("set_float", name) {
            params.set_float(name, value);
        }
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        if let Some(params) = self.params_mut("set_int", name) {
            params.set_int(name, value);
        }
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        if let Some(params) = self.params_mut("set_bool", name) {
            params.set_bool(name, value);
        }
    }

    /// Mark a resource as a graph root for culling
    pub fn set_final_output(&mut self, handle: &ResourceHandle) {
        if !handle.is_valid() {
            log::warn!("set_final_output: ignoring invalid resource handle");
            return;
        }
        self.decls.final_outputs.insert(handle.id());
    }

    /// Open a pass declaration context. An already open context is closed first.
    pub fn begin_pass(&mut self, name: &str) {
        if let Some(open) = &self.current {
            log::warn!(
                "begin_pass('{}') while '{}' is still open, closing it",
                name,
                open.name
            );
            self.end_pass();
        }
        self.current = Some(OpenPass {
            name: name.to_string(),
            decls: PassDeclarations::default(),
        });
    }

    /// Commit the open pass context's declarations
    pub fn end_pass(&mut self) {
        match self.current.take() {
            Some(open) => {
                self.decls
                    .passes
                    .entry(open.name)
                    .or_default()
                    .merge(open.decls);
            }
            None => log::warn!("end_pass called with no open pass context"),
        }
    }

    pub fn current_pass(&self) -> Option<&str> {
        self.current.as_ref().map(|open| open.name.as_str())
    }

    pub fn is_in_pass(&self) -> bool {
        self.current.is_some()
    }
}

impl Drop for GraphBuilder<'_> {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.end_pass();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;

    fn builder_parts() -> (Declarations, u32) {
        (Declarations::default(), 1)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let a = builder.create_color_target("a", 64, 64);
        let b = builder.create_depth_target("b", 64, 64);
        let c = builder.create_constant_buffer("c", 256);
        drop(builder);

        assert_eq!((a.id(), b.id(), c.id()), (1, 2, 3));
        assert_eq!(next, 4);
        assert_eq!(decls.resources.len(), 3);
    }

    #[test]
    fn test_ids_stop_at_invalid_sentinel() {
        let mut decls = Declarations::default();
        let mut next = ResourceHandle::INVALID_ID - 1;
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let last = builder.create_color_target("last", 64, 64);
        let exhausted = builder.create_color_target("exhausted", 64, 64);
        drop(builder);

        assert_eq!(last.id(), ResourceHandle::INVALID_ID - 1);
        assert!(last.is_valid());
        assert!(!exhausted.is_valid());
        assert_eq!(next, ResourceHandle::INVALID_ID);
        assert_eq!(decls.resources.len(), 1);
    }

    #[test]
    fn test_convenience_creators() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);

        let color = builder.create_color_target("color", 1280, 720);
        assert_eq!(color.desc().format, TextureFormat::Rgba8Unorm);
        assert_eq!(
            color.desc().usage,
            ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE
        );

        let depth = builder.create_depth_target("depth", 1280, 720);
        assert_eq!(depth.desc().format, TextureFormat::Depth32Float);
        assert!(depth.desc().usage.contains(ResourceUsage::DEPTH_STENCIL));

        let structured = builder.create_structured_buffer("particles", 16, 1024);
        assert_eq!(structured.desc().size(), 16 * 1024);
        assert!(structured.desc().usage.contains(ResourceUsage::UNORDERED_ACCESS));

        let overflow = builder.create_structured_buffer("huge", u32::MAX, 2);
        assert!(!overflow.is_valid());
    }

    #[test]
    fn test_pass_context_declarations() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let albedo = builder.create_color_target("albedo", 64, 64);
        let lit = builder.create_color_target("lit", 64, 64);

        builder.begin_pass("Lighting");
        builder.add_input("gbuffer", &albedo);
        builder.write(&lit, None);
        builder.set_float("exposure", 2.0);
        builder.end_pass();
        drop(builder);

        let pass = &decls.passes["Lighting"];
        assert_eq!(pass.inputs["gbuffer"], albedo);
        assert_eq!(pass.outputs["lit"], lit);
        assert_eq!(pass.accesses[&albedo.id()], ResourceAccess::Read);
        assert_eq!(pass.accesses[&lit.id()], ResourceAccess::Write);
        assert_eq!(pass.params.get_float("exposure", 0.0), 2.0);
    }

    #[test]
    fn test_explicit_pass_name() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let hdr = builder.create_color_target("hdr", 64, 64);
        builder.write(&hdr, Some("Lighting"));
        builder.read(&hdr, Some("Tonemap"));
        drop(builder);

        assert!(decls.passes["Lighting"].accesses[&hdr.id()].is_write());
        assert!(decls.passes["Tonemap"].accesses[&hdr.id()].is_read());
    }

    #[test]
    fn test_read_then_write_combines() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let history = builder.create_color_target("history", 64, 64);
        builder.begin_pass("Taa");
        builder.read(&history, None);
        builder.write(&history, None);
        builder.end_pass();
        drop(builder);

        assert_eq!(decls.passes["Taa"].accesses[&history.id()], ResourceAccess::ReadWrite);
    }

    #[test]
    fn test_misuse_is_ignored() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let color = builder.create_color_target("color", 64, 64);

        // No pass context
        builder.read(&color, None);
        builder.set_int("samples", 4);
        builder.end_pass();

        // Invalid handle
        builder.begin_pass("A");
        builder.write(&ResourceHandle::invalid(), None);
        builder.set_final_output(&ResourceHandle::invalid());
        builder.end_pass();
        drop(builder);

        assert!(decls.passes["A"].accesses.is_empty());
        assert!(decls.final_outputs.is_empty());
        assert_eq!(decls.passes.len(), 1);
    }

    #[test]
    fn test_begin_pass_closes_previous() {
        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let a = builder.create_color_target("a", 64, 64);
        let b = builder.create_color_target("b", 64, 64);

        builder.begin_pass("First");
        builder.write(&a, None);
        builder.begin_pass("Second");
        builder.write(&b, None);
        assert_eq!(builder.current_pass(), Some("Second"));
        // Dropped with "Second" still open
        drop(builder);

        assert!(decls.passes["First"].writes_only(a.id()));
        assert!(decls.passes["Second"].writes_only(b.id()));
    }

    #[test]
    fn test_import_texture() {
        let device = DummyDevice::new();
        let desc = ResourceDesc::texture_2d(
            800,
            600,
            TextureFormat::Bgra8Unorm,
            ResourceUsage::RENDER_TARGET,
            "swapchain",
            1,
        );
        let texture = device.external_texture(&desc);

        let (mut decls, mut next) = builder_parts();
        let mut builder = GraphBuilder::new(&mut decls, &mut next);
        let handle = builder.import_texture("backbuffer", texture, ResourceState::Common);
        drop(builder);

        assert_eq!(handle.id(), 1);
        assert_eq!(handle.desc().width, 800);
        assert_eq!(handle.desc().format, TextureFormat::Bgra8Unorm);
        assert!(decls.resources[&handle.id()].external.is_some());
    }

    impl PassDeclarations {
        fn writes_only(&self, id: u32) -> bool {
            self.accesses.len() == 1 && self.accesses.get(&id) == Some(&ResourceAccess::Write)
        }
    }
}
