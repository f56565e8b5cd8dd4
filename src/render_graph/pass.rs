//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::builder::GraphBuilder;
use crate::render_graph::resource::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Unique identifier for a render pass (its insertion index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Error returned by [`RenderPass::execute`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    #[error("Missing resource: {0}")]
    MissingResource(String),
    #[error("{0}")]
    Failed(String),
}

/// How a pass touches a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAccess {
    Read,
    Write,
    ReadWrite,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(self, ResourceAccess::Read | ResourceAccess::ReadWrite)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, ResourceAccess::Write | ResourceAccess::ReadWrite)
    }

    /// Union of two declarations on the same resource
    pub fn combine(self, other: ResourceAccess) -> ResourceAccess {
        if self == other {
            self
        } else {
            ResourceAccess::ReadWrite
        }
    }
}

/// Scalar parameters a pass declares during setup and reads at execute time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassParameters {
    floats: HashMap<String, f32>,
    ints: HashMap<String, i32>,
    bools: HashMap<String, bool>,
}

impl PassParameters {
    pub fn set_float(&mut self, name: &str, value: f32) {
        self.floats.insert(name.to_string(), value);
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.ints.insert(name.to_string(), value);
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.bools.insert(name.to_string(), value);
    }

    pub fn get_float(&self, name: &str, default: f32) -> f32 {
        self.floats.get(name).copied().unwrap_or(default)
    }

    pub fn get_int(&self, name: &str, default: i32) -> i32 {
        self.ints.get(name).copied().unwrap_or(default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.bools.get(name).copied().unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.floats.is_empty() && self.ints.is_empty() && self.bools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.floats.len() + self.ints.len() + self.bools.len()
    }

    /// Copy every value from `other`, overwriting on conflict
    pub fn merge(&mut self, other: PassParameters) {
        self.floats.extend(other.floats);
        self.ints.extend(other.ints);
        self.bools.extend(other.bools);
    }
}

/// Context for setting up pass resources.
///
/// Wraps the graph builder with this pass's declaration context already
/// open, so `read`/`write` land on the pass being set up.
pub struct PassSetupContext<'b, 'a> {
    builder: &'b mut GraphBuilder<'a>,
}

impl<'b, 'a> PassSetupContext<'b, 'a> {
    pub(crate) fn new(builder: &'b mut GraphBuilder<'a>) -> Self {
        Self { builder }
    }

    /// Name of the pass being set up
    pub fn pass_name(&self) -> &str {
        self.builder.current_pass().unwrap_or_default()
    }

    /// Full builder access, e.g. to declare dependencies for another pass
    pub fn builder(&mut self) -> &mut GraphBuilder<'a> {
        self.builder
    }

    /// Create a new transient texture
    pub fn create_texture(&mut self, name: &str, desc: ResourceDesc) -> ResourceHandle {
        self.builder.create_texture(name, desc)
    }

    /// Create a new transient buffer
    pub fn create_buffer(&mut self, name: &str, desc: ResourceDesc) -> ResourceHandle {
        self.builder.create_buffer(name, desc)
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, handle: &ResourceHandle) {
        self.builder.read(handle, None);
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, handle: &ResourceHandle) {
        self.builder.write(handle, None);
    }

    pub fn read_write(&mut self, handle: &ResourceHandle) {
        self.builder.read_write(handle, None);
    }

    /// Read a resource and bind it under `name`
    pub fn add_input(&mut self, name: &str, handle: &ResourceHandle) {
        self.builder.add_input(name, handle);
    }

    /// Write a resource and bind it under `name`
    pub fn add_output(&mut self, name: &str, handle: &ResourceHandle) {
        self.builder.add_output(name, handle);
    }

    pub fn set_float(&mut self, name: &str, value: f32) {
        self.builder.set_float(name, value);
    }

    pub fn set_int(&mut self, name: &str, value: i32) {
        self.builder.set_int(name, value);
    }

    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.builder.set_bool(name, value);
    }

    pub fn set_final_output(&mut self, handle: &ResourceHandle) {
        self.builder.set_final_output(handle);
    }
}

/// Everything a pass may use while recording commands
pub struct PassExecuteData<'a> {
    pub(crate) pass_name: &'a str,
    pub(crate) inputs: &'a BTreeMap<String, ResourceHandle>,
    pub(crate) outputs: &'a BTreeMap<String, ResourceHandle>,
    pub(crate) params: &'a PassParameters,
    pub(crate) resources: &'a BTreeMap<u32, ResourceInfo>,
    pub(crate) context: &'a mut dyn RenderContext,
}

impl<'a> PassExecuteData<'a> {
    pub fn pass_name(&self) -> &str {
        self.pass_name
    }

    /// Resolve a named input
    pub fn input(&self, name: &str) -> Result<&ResourceHandle, PassError> {
        self.inputs
            .get(name)
            .ok_or_else(|| PassError::MissingResource(format!("input '{}'", name)))
    }

    /// Resolve a named output
    pub fn output(&self, name: &str) -> Result<&ResourceHandle, PassError> {
        self.outputs
            .get(name)
            .ok_or_else(|| PassError::MissingResource(format!("output '{}'", name)))
    }

    pub fn inputs(&self) -> &BTreeMap<String, ResourceHandle> {
        self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, ResourceHandle> {
        self.outputs
    }

    pub fn params(&self) -> &PassParameters {
        self.params
    }

    pub fn get_float(&self, name: &str, default: f32) -> f32 {
        self.params.get_float(name, default)
    }

    pub fn get_int(&self, name: &str, default: i32) -> i32 {
        self.params.get_int(name, default)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        self.params.get_bool(name, default)
    }

    pub fn resource_info(&self, handle: &ResourceHandle) -> Option<&ResourceInfo> {
        self.resources.get(&handle.id())
    }

    /// Get the backing texture for a resource
    pub fn texture(&self, handle: &ResourceHandle) -> Result<&Arc<dyn GpuTexture>, PassError> {
        self.resource_info(handle)
            .and_then(|info| info.backing.as_ref())
            .and_then(|backing| backing.as_texture())
            .ok_or_else(|| PassError::MissingResource(format!("texture '{}'", handle)))
    }

    /// Get the backing buffer for a resource
    pub fn buffer(&self, handle: &ResourceHandle) -> Result<&Arc<dyn GpuBuffer>, PassError> {
        self.resource_info(handle)
            .and_then(|info| info.backing.as_ref())
            .and_then(|backing| backing.as_buffer())
            .ok_or_else(|| PassError::MissingResource(format!("buffer '{}'", handle)))
    }

    /// The command recording target
    pub fn context(&mut self) -> &mut dyn RenderContext {
        &mut *self.context
    }

    /// Get the context as its concrete backend type
    pub fn context_as<C: RenderContext>(&mut self) -> Option<&mut C> {
        self.context.as_any_mut().downcast_mut::<C>()
    }
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name, unique within a graph
    fn name(&self) -> &str;

    /// Setup phase - declare resources, dependencies and parameters.
    ///
    /// Runs on every compile, so it must declare the same things each time
    /// for the same configuration.
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - record commands against resolved resources
    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError>;

    /// Opt out before dependency analysis; disabled passes skip setup
    fn is_enabled(&self, _ctx: &PassSetupContext) -> bool {
        true
    }

    fn description(&self) -> String {
        format!("RenderPass: {}", self.name())
    }

    fn category(&self) -> &str {
        "General"
    }
}

/// Where a pass ended up after compilation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    /// Registered, not compiled yet
    #[default]
    Pending,
    /// Part of the execution order
    Scheduled,
    /// Contributes to no final output
    Culled,
    /// Opted out through `is_enabled`
    Disabled,
}

/// A state transition attached to a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: ResourceHandle,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Metadata about a pass in the graph
#[derive(Debug, Clone)]
pub struct PassInfo {
    pub id: PassId,
    pub name: String,
    /// Insertion position, used for deterministic tie-breaking
    pub pass_index: usize,
    pub inputs: BTreeMap<String, ResourceHandle>,
    pub outputs: BTreeMap<String, ResourceHandle>,
    /// Every resource the pass touches, keyed by resource id
    pub accesses: BTreeMap<u32, ResourceAccess>,
    pub params: PassParameters,
    pub pre_barriers: Vec<ResourceBarrier>,
    pub post_barriers: Vec<ResourceBarrier>,
    pub state: PassState,
    /// Runtime switch; a skipped pass keeps its barriers but does not execute
    pub skip: bool,
}

impl PassInfo {
    pub(crate) fn new(id: PassId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            pass_index: id.index(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            accesses: BTreeMap::new(),
            params: PassParameters::default(),
            pre_barriers: Vec::new(),
            post_barriers: Vec::new(),
            state: PassState::Pending,
            skip: false,
        }
    }

    /// Whether the pass survived compilation
    pub fn is_enabled(&self) -> bool {
        self.state == PassState::Scheduled
    }

    pub fn reads_resource(&self, id: u32) -> bool {
        self.accesses.get(&id).is_some_and(|a| a.is_read())
    }

    pub fn writes_resource(&self, id: u32) -> bool {
        self.accesses.get(&id).is_some_and(|a| a.is_write())
    }

    pub fn written_resources(&self) -> impl Iterator<Item = u32> + '_ {
        self.accesses
            .iter()
            .filter(|(_, a)| a.is_write())
            .map(|(&id, _)| id)
    }

    pub fn read_resources(&self) -> impl Iterator<Item = u32> + '_ {
        self.accesses
            .iter()
            .filter(|(_, a)| a.is_read())
            .map(|(&id, _)| id)
    }
}
