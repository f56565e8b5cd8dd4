//! Graph compilation stages
//!
//! Each stage is a plain function over the staged tables so that
//! [`RenderGraph::compile`](super::RenderGraph::compile) can run them on
//! copies and only commit when every stage succeeds.

use crate::backend::traits::{BackingResource, RenderDevice};
use crate::backend::types::*;
use crate::render_graph::builder::{Declarations, GraphBuilder};
use crate::render_graph::error::GraphError;
use crate::render_graph::graph::GraphSettings;
use crate::render_graph::pass::*;
use crate::render_graph::pool::{BackingId, ResourcePool};
use crate::render_graph::resource::*;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

/// Check pass names before any setup runs
pub(crate) fn validate_passes(
    passes: &[Box<dyn RenderPass>],
    settings: &GraphSettings,
) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for (index, pass) in passes.iter().enumerate() {
        let name = pass.name();
        if name.is_empty() {
            if settings.enable_validation {
                return Err(GraphError::EmptyPassName { index });
            }
            continue;
        }
        if !seen.insert(name) {
            return Err(GraphError::DuplicatePassName(name.to_string()));
        }
    }
    Ok(())
}

/// Run every enabled pass's setup against the staged declarations.
///
/// Returns the enabled flag of each pass, by insertion index.
pub(crate) fn run_setup(
    passes: &mut [Box<dyn RenderPass>],
    decls: &mut Declarations,
    next_resource_id: &mut u32,
) -> Vec<bool> {
    let mut builder = GraphBuilder::new(decls, next_resource_id);
    let mut enabled = Vec::with_capacity(passes.len());

    for pass in passes.iter_mut() {
        builder.begin_pass(pass.name());
        let mut ctx = PassSetupContext::new(&mut builder);
        let is_enabled = pass.is_enabled(&ctx);
        if is_enabled {
            pass.setup(&mut ctx);
        } else {
            log::debug!("Pass '{}' is disabled, skipping setup", pass.name());
        }
        builder.end_pass();
        enabled.push(is_enabled);
    }

    enabled
}

/// Check the declarations produced by setup
pub(crate) fn validate_declarations(
    decls: &Declarations,
    passes: &[Box<dyn RenderPass>],
    settings: &GraphSettings,
) -> Result<(), GraphError> {
    let names: HashSet<&str> = passes.iter().map(|p| p.name()).collect();

    for (name, pass) in &decls.passes {
        if !names.contains(name.as_str()) {
            return Err(GraphError::UnknownPass(name.clone()));
        }
        if let Some(&id) = pass
            .accesses
            .keys()
            .find(|id| !decls.resources.contains_key(id))
        {
            return Err(GraphError::InvalidHandle {
                context: format!("Pass '{}'", name),
                id,
            });
        }
    }

    if let Some(&id) = decls
        .final_outputs
        .iter()
        .find(|id| !decls.resources.contains_key(id))
    {
        return Err(GraphError::InvalidHandle {
            context: "Final output".to_string(),
            id,
        });
    }

    if settings.enable_validation {
        for (&id, resource) in &decls.resources {
            if let Err(reason) = resource.handle.desc().validate() {
                return Err(GraphError::InvalidResourceDesc {
                    id,
                    name: resource.handle.name().to_string(),
                    reason,
                });
            }
        }
    }

    Ok(())
}

/// Build the pass table from the declarations
pub(crate) fn build_pass_infos(
    passes: &[Box<dyn RenderPass>],
    decls: &Declarations,
    enabled: &[bool],
) -> Vec<PassInfo> {
    passes
        .iter()
        .enumerate()
        .map(|(index, pass)| {
            let mut info = PassInfo::new(PassId(index as u32), pass.name());
            if let Some(declared) = decls.passes.get(pass.name()) {
                info.inputs = declared.inputs.clone();
                info.outputs = declared.outputs.clone();
                info.accesses = declared.accesses.clone();
                info.params = declared.params.clone();
            }
            if !enabled.get(index).copied().unwrap_or(true) {
                info.state = PassState::Disabled;
            }
            info
        })
        .collect()
}

/// Build the resource table from the declarations
pub(crate) fn build_resources(decls: &Declarations) -> BTreeMap<u32, ResourceInfo> {
    decls
        .resources
        .iter()
        .map(|(&id, declared)| {
            let info = match &declared.external {
                Some(external) => ResourceInfo::external(
                    declared.handle.clone(),
                    external.backing.clone(),
                    external.initial_state,
                ),
                None => ResourceInfo::transient(declared.handle.clone()),
            };
            (id, info)
        })
        .collect()
}

/// Producer-to-consumer edges between passes that are not disabled.
///
/// B depends on A when B reads a resource A writes. When B also writes that
/// resource, only writers declared before B count, so read-modify-write
/// chains follow declaration order instead of forming a cycle.
pub(crate) fn build_edges(infos: &[PassInfo]) -> BTreeSet<(usize, usize)> {
    let active = || infos.iter().filter(|info| info.state != PassState::Disabled);

    let mut writers: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for info in active() {
        for id in info.written_resources() {
            writers.entry(id).or_default().push(info.pass_index);
        }
    }

    let mut edges = BTreeSet::new();
    for reader in active() {
        for (id, access) in &reader.accesses {
            if !access.is_read() {
                continue;
            }
            let Some(producers) = writers.get(id) else {
                continue;
            };
            for &writer in producers {
                if writer == reader.pass_index {
                    continue;
                }
                if access.is_write() && writer > reader.pass_index {
                    continue;
                }
                edges.insert((writer, reader.pass_index));
            }
        }
    }
    edges
}

/// Kahn's algorithm; ready passes leave in ascending insertion order
pub(crate) fn topological_sort(
    nodes: &[usize],
    edges: &BTreeSet<(usize, usize)>,
    infos: &[PassInfo],
) -> Result<Vec<usize>, GraphError> {
    let mut in_degree: BTreeMap<usize, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    let mut successors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for &(from, to) in edges {
        if let Some(degree) = in_degree.get_mut(&to) {
            *degree += 1;
            successors.entry(from).or_default().push(to);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&node, _)| Reverse(node))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in successors.get(&node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let passes = in_degree
            .iter()
            .filter(|(_, &degree)| degree > 0)
            .map(|(&node, _)| infos[node].name.clone())
            .collect();
        return Err(GraphError::CyclicDependency { passes });
    }

    Ok(order)
}

/// Passes that contribute to the frame.
///
/// With final outputs, a pass survives when it writes a final output or
/// feeds, through dependency edges, a pass that does. Without them, a pass
/// survives when it declares no writes, writes an external resource, or
/// writes something another surviving pass reads.
pub(crate) fn cull(
    order: &[usize],
    infos: &[PassInfo],
    edges: &BTreeSet<(usize, usize)>,
    resources: &BTreeMap<u32, ResourceInfo>,
    final_outputs: &BTreeSet<u32>,
) -> BTreeSet<usize> {
    if !final_outputs.is_empty() {
        let mut predecessors: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &(from, to) in edges {
            predecessors.entry(to).or_default().push(from);
        }

        let mut live = BTreeSet::new();
        let mut stack: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&p| infos[p].written_resources().any(|id| final_outputs.contains(&id)))
            .collect();

        while let Some(pass) = stack.pop() {
            if live.insert(pass) {
                stack.extend(predecessors.get(&pass).into_iter().flatten().copied());
            }
        }
        return live;
    }

    let mut live: BTreeSet<usize> = order.iter().copied().collect();
    loop {
        let mut readers: HashMap<u32, Vec<usize>> = HashMap::new();
        for &pass in &live {
            for id in infos[pass].read_resources() {
                readers.entry(id).or_default().push(pass);
            }
        }

        let dead: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&pass| {
                let mut writes = infos[pass].written_resources().peekable();
                if writes.peek().is_none() {
                    return false;
                }
                !writes.any(|id| {
                    resources.get(&id).is_some_and(|r| r.is_external())
                        || readers
                            .get(&id)
                            .is_some_and(|rs| rs.iter().any(|&r| r != pass))
                })
            })
            .collect();

        if dead.is_empty() {
            return live;
        }
        for pass in dead {
            live.remove(&pass);
        }
    }
}

/// First/last execution-order positions for every resource
pub(crate) fn compute_lifetimes(
    execution_order: &[usize],
    infos: &[PassInfo],
    resources: &mut BTreeMap<u32, ResourceInfo>,
    final_outputs: &BTreeSet<u32>,
) {
    for resource in resources.values_mut() {
        resource.lifetime = ResourceLifetime::default();
    }

    for (position, &pass) in execution_order.iter().enumerate() {
        for id in infos[pass].accesses.keys() {
            if let Some(resource) = resources.get_mut(id) {
                resource.lifetime.include(position);
            }
        }
    }

    // Final outputs stay live until the end of the frame
    if let Some(last) = execution_order.len().checked_sub(1) {
        for id in final_outputs {
            if let Some(resource) = resources.get_mut(id) {
                if resource.lifetime.is_used() {
                    resource.lifetime.last_pass = Some(last);
                }
            }
        }
    }
}

/// Result of transient allocation
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AllocationSummary {
    /// Transients that received a backing object
    pub allocated: usize,
    /// Transients sharing an object with an earlier resource this frame
    pub aliased: usize,
    /// Objects created on the device
    pub created: usize,
    /// Bytes of distinct transient objects in use this frame
    pub memory_usage: u64,
}

/// Bind a backing object to every live transient.
///
/// Resources are visited by first use. With aliasing on, objects whose
/// tenant's last use precedes the current first use go back to the pool
/// before the lookup, so two overlapping resources never share an object.
pub(crate) fn allocate_transients(
    resources: &mut BTreeMap<u32, ResourceInfo>,
    pool: &mut ResourcePool,
    device: &dyn RenderDevice,
    settings: &GraphSettings,
) -> Result<AllocationSummary, GraphError> {
    let mut pending: Vec<(usize, u32, usize)> = resources
        .values()
        .filter(|r| r.is_transient())
        .filter_map(|r| match (r.lifetime.first_pass, r.lifetime.last_pass) {
            (Some(first), Some(last)) => Some((first, r.handle.id(), last)),
            _ => None,
        })
        .collect();
    pending.sort_unstable();

    let mut summary = AllocationSummary::default();
    let mut active: Vec<(usize, BackingId)> = Vec::new();
    let mut used_this_frame: HashSet<BackingId> = HashSet::new();

    for (first, id, last) in pending {
        if settings.enable_resource_aliasing {
            let (retired, still_active): (Vec<_>, Vec<_>) =
                active.into_iter().partition(|&(end, _)| end < first);
            active = still_active;
            for (_, backing_id) in retired {
                if let Some(backing) = find_backing(resources, backing_id) {
                    pool.release(backing_id, backing);
                }
            }
        }

        let Some(resource) = resources.get_mut(&id) else {
            continue;
        };
        let desc = resource.handle.desc();

        let (backing_id, backing) = match pool.acquire(desc) {
            Some(found) => found,
            None => {
                let backing =
                    device
                        .create_resource(desc)
                        .map_err(|source| GraphError::ResourceCreation {
                            resource: resource.handle.name().to_string(),
                            source,
                        })?;
                summary.created += 1;
                (pool.register(), backing)
            }
        };

        let aliased = !used_this_frame.insert(backing_id);
        if aliased {
            summary.aliased += 1;
            log::debug!(
                "Resource {} aliases backing object {:?}",
                resource.handle,
                backing_id
            );
        } else {
            summary.memory_usage += backing.size_in_bytes();
        }

        resource.backing = Some(backing);
        resource.backing_id = Some(backing_id);
        resource.aliased = aliased;
        resource.current_state = ResourceState::Common;
        summary.allocated += 1;
        active.push((last, backing_id));
    }

    Ok(summary)
}

fn find_backing(resources: &BTreeMap<u32, ResourceInfo>, id: BackingId) -> Option<BackingResource> {
    resources
        .values()
        .find(|r| r.backing_id == Some(id))
        .and_then(|r| r.backing.clone())
}

/// State a pass needs a resource in for the given access
pub fn required_state(usage: ResourceUsage, access: ResourceAccess) -> ResourceState {
    match access {
        ResourceAccess::Write => {
            if usage.contains(ResourceUsage::RENDER_TARGET) {
                ResourceState::RenderTarget
            } else if usage.contains(ResourceUsage::DEPTH_STENCIL) {
                ResourceState::DepthWrite
            } else if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
                ResourceState::UnorderedAccess
            } else if usage.contains(ResourceUsage::COPY_DST) {
                ResourceState::CopyDst
            } else {
                ResourceState::Common
            }
        }
        ResourceAccess::Read => {
            if usage.contains(ResourceUsage::SHADER_RESOURCE) {
                ResourceState::ShaderResource
            } else if usage.contains(ResourceUsage::DEPTH_STENCIL) {
                ResourceState::DepthRead
            } else if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
                ResourceState::UnorderedAccess
            } else if usage.contains(ResourceUsage::COPY_SRC) {
                ResourceState::CopySrc
            } else {
                ResourceState::Common
            }
        }
        ResourceAccess::ReadWrite => {
            if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
                ResourceState::UnorderedAccess
            } else if usage.contains(ResourceUsage::RENDER_TARGET) {
                ResourceState::RenderTarget
            } else if usage.contains(ResourceUsage::DEPTH_STENCIL) {
                ResourceState::DepthWrite
            } else if usage.contains(ResourceUsage::COPY_DST) {
                ResourceState::CopyDst
            } else {
                ResourceState::Common
            }
        }
    }
}

/// Attach pre/post transitions to every scheduled pass.
///
/// State is tracked per backing object. Every object starts the frame in
/// its resting state and is returned to it after its last use, so repeated
/// execution of one compiled frame stays consistent.
pub(crate) fn analyze_barriers(
    execution_order: &[usize],
    infos: &mut [PassInfo],
    resources: &mut BTreeMap<u32, ResourceInfo>,
) -> usize {
    let mut states: HashMap<StateKey, ResourceState> = HashMap::new();

    // Last position at which each backing object is live, and its final tenant
    let mut release_at: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    let mut key_last: HashMap<StateKey, (usize, u32)> = HashMap::new();
    for resource in resources.values() {
        if let Some(last) = resource.lifetime.last_pass {
            let entry = key_last
                .entry(resource.state_key())
                .or_insert((last, resource.handle.id()));
            if last > entry.0 {
                *entry = (last, resource.handle.id());
            }
        }
    }
    for &(last, id) in key_last.values() {
        release_at.entry(last).or_default().push(id);
    }
    for ids in release_at.values_mut() {
        ids.sort_unstable();
    }

    let mut barrier_count = 0;
    for (position, &pass) in execution_order.iter().enumerate() {
        let mut pre = Vec::new();
        for (id, &access) in &infos[pass].accesses {
            let Some(resource) = resources.get(id) else {
                continue;
            };
            let required = required_state(resource.desc().usage, access);
            let current = states
                .entry(resource.state_key())
                .or_insert_with(|| resource.resting_state());
            if *current != required {
                pre.push(ResourceBarrier {
                    resource: resource.handle.clone(),
                    before: *current,
                    after: required,
                });
                *current = required;
            }
        }

        let mut post = Vec::new();
        for id in release_at.get(&position).into_iter().flatten() {
            let Some(resource) = resources.get(id) else {
                continue;
            };
            let resting = resource.resting_state();
            if let Some(current) = states.get_mut(&resource.state_key()) {
                if *current != resting {
                    post.push(ResourceBarrier {
                        resource: resource.handle.clone(),
                        before: *current,
                        after: resting,
                    });
                    *current = resting;
                }
            }
        }

        barrier_count += pre.len() + post.len();
        infos[pass].pre_barriers = pre;
        infos[pass].post_barriers = post;
    }

    for resource in resources.values_mut() {
        resource.current_state = resource.resting_state();
    }

    barrier_count
}
