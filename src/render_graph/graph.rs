//! Render graph definition, compilation and execution

use crate::backend::traits::*;
use crate::render_graph::builder::{Declarations, GraphBuilder};
use crate::render_graph::compiler::{self, AllocationSummary};
use crate::render_graph::error::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::pool::{ResourcePool, ResourcePoolStats};
use crate::render_graph::resource::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for compiling a render graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    /// Reuse transient backing objects across non-overlapping lifetimes
    pub enable_resource_aliasing: bool,
    /// Drop passes that contribute to no final output
    pub enable_pass_culling: bool,
    /// Check pass names and resource descriptors before compiling
    pub enable_validation: bool,
    /// Maximum idle backing objects kept per kind by the pool
    pub max_transient_resources: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            enable_resource_aliasing: true,
            enable_pass_culling: true,
            enable_validation: true,
            max_transient_resources: 1024,
        }
    }
}

/// Counters from the last compile and execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub total_passes: usize,
    /// Scheduled passes after compile, passes actually run after execute
    pub executed_passes: usize,
    pub culled_passes: usize,
    pub disabled_passes: usize,
    pub total_resources: usize,
    pub transient_resources: usize,
    pub external_resources: usize,
    pub aliased_resources: usize,
    pub barrier_count: usize,
    /// Bytes of distinct transient backing objects
    pub memory_usage: u64,
    pub compile_time: Duration,
    pub execute_time: Duration,
}

/// Everything a successful compile produces, committed in one step
struct CompiledFrame {
    pass_infos: Vec<PassInfo>,
    resources: BTreeMap<u32, ResourceInfo>,
    final_outputs: BTreeSet<u32>,
    execution_order: Vec<PassId>,
    dependency_edges: Vec<(PassId, PassId)>,
    pool: ResourcePool,
    allocation: AllocationSummary,
    barrier_count: usize,
}

/// The main render graph structure
pub struct RenderGraph {
    device: Arc<dyn RenderDevice>,
    settings: GraphSettings,
    passes: Vec<Box<dyn RenderPass>>,
    /// Declarations made through [`RenderGraph::builder`]; kept until `clear`
    declarations: Declarations,
    next_resource_id: u32,
    skipped_passes: BTreeSet<PassId>,

    // Compiled state
    pass_infos: Vec<PassInfo>,
    resources: BTreeMap<u32, ResourceInfo>,
    final_outputs: BTreeSet<u32>,
    execution_order: Vec<PassId>,
    dependency_edges: Vec<(PassId, PassId)>,
    pool: ResourcePool,
    stats: GraphStats,
    compiled: bool,
}

impl RenderGraph {
    pub fn new(device: Arc<dyn RenderDevice>) -> Self {
        Self::with_settings(device, GraphSettings::default())
    }

    pub fn with_settings(device: Arc<dyn RenderDevice>, settings: GraphSettings) -> Self {
        let pool = ResourcePool::new(settings.max_transient_resources);
        Self {
            device,
            settings,
            passes: Vec::new(),
            declarations: Declarations::default(),
            // Id 0 is never issued
            next_resource_id: 1,
            skipped_passes: BTreeSet::new(),
            pass_infos: Vec::new(),
            resources: BTreeMap::new(),
            final_outputs: BTreeSet::new(),
            execution_order: Vec::new(),
            dependency_edges: Vec::new(),
            pool,
            stats: GraphStats::default(),
            compiled: false,
        }
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Takes effect on the next compile
    pub fn set_settings(&mut self, settings: GraphSettings) {
        self.settings = settings;
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.device
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> PassId {
        self.add_boxed_pass(Box::new(pass))
    }

    pub fn add_boxed_pass(&mut self, pass: Box<dyn RenderPass>) -> PassId {
        let id = PassId(self.passes.len() as u32);
        log::debug!("Added pass '{}' as {:?}", pass.name(), id);
        self.passes.push(pass);
        id
    }

    /// Declare resources and dependencies outside any pass's setup.
    ///
    /// These declarations persist across compiles until [`clear`](Self::clear).
    pub fn builder(&mut self) -> GraphBuilder<'_> {
        GraphBuilder::new(&mut self.declarations, &mut self.next_resource_id)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Run setup, schedule passes, allocate transients and plan barriers.
    ///
    /// On failure the previously compiled state is left untouched.
    pub fn compile(&mut self) -> Result<(), GraphError> {
        let start = Instant::now();
        match self.compile_staged() {
            Ok(frame) => {
                self.commit(frame, start.elapsed());
                Ok(())
            }
            Err(err) => {
                log::error!("Render graph compile failed: {}", err);
                Err(err)
            }
        }
    }

    fn compile_staged(&mut self) -> Result<CompiledFrame, GraphError> {
        compiler::validate_passes(&self.passes, &self.settings)?;

        let mut decls = self.declarations.clone();
        let mut next_resource_id = self.next_resource_id;
        let enabled = compiler::run_setup(&mut self.passes, &mut decls, &mut next_resource_id);
        // Ids stay unique even when this compile fails
        self.next_resource_id = next_resource_id;

        compiler::validate_declarations(&decls, &self.passes, &self.settings)?;

        let mut pass_infos = compiler::build_pass_infos(&self.passes, &decls, &enabled);
        let mut resources = compiler::build_resources(&decls);
        let final_outputs = decls.final_outputs;

        let edges = compiler::build_edges(&pass_infos);
        let nodes: Vec<usize> = pass_infos
            .iter()
            .filter(|info| info.state != PassState::Disabled)
            .map(|info| info.pass_index)
            .collect();
        let sorted = compiler::topological_sort(&nodes, &edges, &pass_infos)?;

        let live = if self.settings.enable_pass_culling {
            compiler::cull(&sorted, &pass_infos, &edges, &resources, &final_outputs)
        } else {
            sorted.iter().copied().collect()
        };
        let order: Vec<usize> = sorted.into_iter().filter(|p| live.contains(p)).collect();

        for info in pass_infos
            .iter_mut()
            .filter(|info| info.state != PassState::Disabled)
        {
            if live.contains(&info.pass_index) {
                info.state = PassState::Scheduled;
            } else {
                log::debug!("Culled pass '{}'", info.name);
                info.state = PassState::Culled;
            }
            info.skip = self.skipped_passes.contains(&info.id);
        }

        compiler::compute_lifetimes(&order, &pass_infos, &mut resources, &final_outputs);

        // Objects backing the current frame become reusable by the new one
        let mut pool = self.pool.clone();
        pool.set_max_cached_resources(self.settings.max_transient_resources);
        for resource in self.resources.values() {
            if let (Some(id), Some(backing)) = (resource.backing_id, &resource.backing) {
                pool.release(id, backing.clone());
            }
        }

        let allocation = compiler::allocate_transients(
            &mut resources,
            &mut pool,
            self.device.as_ref(),
            &self.settings,
        )?;
        let barrier_count = compiler::analyze_barriers(&order, &mut pass_infos, &mut resources);

        let to_id = |index: usize| PassId(index as u32);
        Ok(CompiledFrame {
            pass_infos,
            resources,
            final_outputs,
            execution_order: order.into_iter().map(to_id).collect(),
            dependency_edges: edges
                .into_iter()
                .map(|(from, to)| (to_id(from), to_id(to)))
                .collect(),
            pool,
            allocation,
            barrier_count,
        })
    }

    fn commit(&mut self, frame: CompiledFrame, compile_time: Duration) {
        let count_state = |state: PassState| {
            frame
                .pass_infos
                .iter()
                .filter(|info| info.state == state)
                .count()
        };

        self.stats = GraphStats {
            total_passes: self.passes.len(),
            executed_passes: frame.execution_order.len(),
            culled_passes: count_state(PassState::Culled),
            disabled_passes: count_state(PassState::Disabled),
            total_resources: frame.resources.len(),
            transient_resources: frame.resources.values().filter(|r| r.is_transient()).count(),
            external_resources: frame.resources.values().filter(|r| r.is_external()).count(),
            aliased_resources: frame.allocation.aliased,
            barrier_count: frame.barrier_count,
            memory_usage: frame.allocation.memory_usage,
            compile_time,
            execute_time: Duration::ZERO,
        };

        self.pass_infos = frame.pass_infos;
        self.resources = frame.resources;
        self.final_outputs = frame.final_outputs;
        self.execution_order = frame.execution_order;
        self.dependency_edges = frame.dependency_edges;
        self.pool = frame.pool;
        self.compiled = true;

        log::info!(
            "Render graph compiled: {}/{} passes scheduled ({} culled, {} disabled), {} resources ({} aliased, {} created), {} barriers, {} KiB transient memory in {:?}",
            self.stats.executed_passes,
            self.stats.total_passes,
            self.stats.culled_passes,
            self.stats.disabled_passes,
            self.stats.total_resources,
            self.stats.aliased_resources,
            frame.allocation.created,
            self.stats.barrier_count,
            self.stats.memory_usage / 1024,
            compile_time
        );
    }

    /// Record one frame: barriers and pass commands in execution order.
    ///
    /// Stops at the first failing pass; later passes do not run.
    pub fn execute(&mut self, ctx: &mut dyn RenderContext) -> Result<(), GraphError> {
        if !self.compiled {
            return Err(GraphError::NotCompiled);
        }

        let start = Instant::now();
        let mut executed = 0;
        let mut result = Ok(());

        for &id in &self.execution_order {
            let Some(info) = self.pass_infos.get(id.index()) else {
                continue;
            };
            let Some(pass) = self.passes.get(id.index()) else {
                continue;
            };

            Self::record_barriers(&mut self.resources, &info.pre_barriers, ctx);

            if info.skip {
                log::trace!("Skipping pass '{}'", info.name);
            } else {
                let mut data = PassExecuteData {
                    pass_name: &info.name,
                    inputs: &info.inputs,
                    outputs: &info.outputs,
                    params: &info.params,
                    resources: &self.resources,
                    context: &mut *ctx,
                };
                if let Err(source) = pass.execute(&mut data) {
                    log::error!("Pass '{}' failed: {}", info.name, source);
                    result = Err(GraphError::Execution {
                        pass: info.name.clone(),
                        source,
                    });
                    break;
                }
                executed += 1;
            }

            Self::record_barriers(&mut self.resources, &info.post_barriers, ctx);
        }

        if result.is_err() {
            Self::restore_resting_states(&mut self.resources, ctx);
        }

        self.stats.executed_passes = executed;
        self.stats.execute_time = start.elapsed();
        log::trace!(
            "Executed {} passes in {:?}",
            executed,
            self.stats.execute_time
        );
        result
    }

    fn record_barriers(
        resources: &mut BTreeMap<u32, ResourceInfo>,
        barriers: &[ResourceBarrier],
        ctx: &mut dyn RenderContext,
    ) {
        if barriers.is_empty() {
            return;
        }

        let transitions: Vec<ResourceTransition<'_>> = barriers
            .iter()
            .filter_map(|barrier| {
                let backing = resources.get(&barrier.resource.id())?.backing.as_ref()?;
                Some(ResourceTransition {
                    name: barrier.resource.name(),
                    resource: backing,
                    before: barrier.before,
                    after: barrier.after,
                })
            })
            .collect();
        ctx.resource_barriers(&transitions);

        // Every tenant of a backing object sees the object's state
        for barrier in barriers {
            let Some(key) = resources.get(&barrier.resource.id()).map(|r| r.state_key()) else {
                continue;
            };
            for info in resources.values_mut().filter(|r| r.state_key() == key) {
                info.current_state = barrier.after;
            }
        }
    }

    /// Return every backing object left mid-frame to its resting state.
    ///
    /// Compiled barriers assume each frame starts at rest, so an aborted
    /// frame must not leak its intermediate states into the next one.
    fn restore_resting_states(
        resources: &mut BTreeMap<u32, ResourceInfo>,
        ctx: &mut dyn RenderContext,
    ) {
        let mut seen = HashSet::new();
        let barriers: Vec<ResourceBarrier> = resources
            .values()
            .filter(|r| r.is_allocated() && seen.insert(r.state_key()))
            .filter(|r| r.current_state != r.resting_state())
            .map(|r| ResourceBarrier {
                resource: r.handle.clone(),
                before: r.current_state,
                after: r.resting_state(),
            })
            .collect();

        if !barriers.is_empty() {
            log::debug!(
                "Returning {} resources to their resting state after a failed frame",
                barriers.len()
            );
            Self::record_barriers(resources, &barriers, ctx);
        }
    }

    /// Skip a compiled pass at execute time without recompiling.
    ///
    /// Its barriers are still recorded so later passes see consistent state.
    /// Returns false for an unknown pass.
    pub fn set_pass_enabled(&mut self, id: PassId, enabled: bool) -> bool {
        if id.index() >= self.passes.len() {
            return false;
        }
        if enabled {
            self.skipped_passes.remove(&id);
        } else {
            self.skipped_passes.insert(id);
        }
        if let Some(info) = self.pass_infos.get_mut(id.index()) {
            info.skip = !enabled;
        }
        true
    }

    /// Remove every pass, resource and declaration.
    ///
    /// Transient backing objects go back to the pool; resource ids keep
    /// counting up so stale handles never match new resources.
    pub fn clear(&mut self) {
        for resource in self.resources.values() {
            if let (Some(id), Some(backing)) = (resource.backing_id, &resource.backing) {
                self.pool.release(id, backing.clone());
            }
        }

        self.passes.clear();
        self.declarations = Declarations::default();
        self.skipped_passes.clear();
        self.pass_infos.clear();
        self.resources.clear();
        self.final_outputs.clear();
        self.execution_order.clear();
        self.dependency_edges.clear();
        self.stats = GraphStats::default();
        self.compiled = false;
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    pub fn pool_stats(&self) -> ResourcePoolStats {
        self.pool.stats()
    }

    pub fn resource_info(&self, handle: &ResourceHandle) -> Option<&ResourceInfo> {
        self.resources.get(&handle.id())
    }

    pub fn resources(&self) -> impl Iterator<Item = &ResourceInfo> {
        self.resources.values()
    }

    /// Get the backing texture of a compiled resource
    pub fn texture(&self, handle: &ResourceHandle) -> Option<&Arc<dyn GpuTexture>> {
        self.resource_info(handle)?.backing.as_ref()?.as_texture()
    }

    /// Get the backing buffer of a compiled resource
    pub fn buffer(&self, handle: &ResourceHandle) -> Option<&Arc<dyn GpuBuffer>> {
        self.resource_info(handle)?.backing.as_ref()?.as_buffer()
    }

    pub fn pass_info(&self, id: PassId) -> Option<&PassInfo> {
        self.pass_infos.get(id.index())
    }

    pub fn pass_infos(&self) -> &[PassInfo] {
        &self.pass_infos
    }

    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        self.passes.get(id.index()).map(|p| p.as_ref())
    }

    pub fn find_pass(&self, name: &str) -> Option<PassId> {
        self.passes
            .iter()
            .position(|p| p.name() == name)
            .map(|index| PassId(index as u32))
    }

    pub fn execution_order(&self) -> &[PassId] {
        &self.execution_order
    }

    /// Producer-to-consumer pass edges of the last compile
    pub fn dependency_edges(&self) -> &[(PassId, PassId)] {
        &self.dependency_edges
    }

    pub fn final_outputs(&self) -> impl Iterator<Item = &ResourceHandle> {
        self.final_outputs
            .iter()
            .filter_map(|id| self.resources.get(id).map(|r| &r.handle))
    }

    /// Human-readable summary of passes, resources and statistics.
    /// Also written to the log at debug level.
    pub fn dump_debug_info(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.write_debug_info(&mut out);
        log::debug!("{}", out);
        out
    }

    fn write_debug_info(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "=== Render Graph ===")?;
        writeln!(out, "Passes ({}):", self.passes.len())?;
        for (index, pass) in self.passes.iter().enumerate() {
            let info = self.pass_infos.get(index);
            let state = info.map_or(PassState::Pending, |i| i.state);
            writeln!(
                out,
                "  [{}] {} ({}) {:?}{}",
                index,
                pass.name(),
                pass.category(),
                state,
                if info.is_some_and(|i| i.skip) { " skipped" } else { "" }
            )?;
            if let Some(info) = info {
                for (id, access) in &info.accesses {
                    let name = self.resources.get(id).map_or("?", |r| r.handle.name());
                    writeln!(out, "      {:?} {}#{}", access, name, id)?;
                }
                for barrier in &info.pre_barriers {
                    writeln!(
                        out,
                        "      pre  {}: {:?} -> {:?}",
                        barrier.resource, barrier.before, barrier.after
                    )?;
                }
                for barrier in &info.post_barriers {
                    writeln!(
                        out,
                        "      post {}: {:?} -> {:?}",
                        barrier.resource, barrier.before, barrier.after
                    )?;
                }
            }
        }

        let order: Vec<&str> = self
            .execution_order
            .iter()
            .filter_map(|id| self.pass_infos.get(id.index()))
            .map(|info| info.name.as_str())
            .collect();
        writeln!(out, "Execution order: {}", order.join(" -> "))?;

        writeln!(out, "Resources ({}):", self.resources.len())?;
        for resource in self.resources.values() {
            let desc = resource.desc();
            let lifetime = match (resource.lifetime.first_pass, resource.lifetime.last_pass) {
                (Some(first), Some(last)) => format!("{}..={}", first, last),
                _ => "unused".to_string(),
            };
            writeln!(
                out,
                "  {} {:?} {}x{}x{} {:?} {} lifetime {}{}",
                resource.handle,
                desc.ty,
                desc.width,
                desc.height,
                desc.depth,
                desc.format,
                if resource.is_external() { "external" } else { "transient" },
                lifetime,
                if resource.aliased { " aliased" } else { "" }
            )?;
        }

        let s = &self.stats;
        writeln!(out, "Statistics:")?;
        writeln!(
            out,
            "  passes: {} total, {} executed, {} culled, {} disabled",
            s.total_passes, s.executed_passes, s.culled_passes, s.disabled_passes
        )?;
        writeln!(
            out,
            "  resources: {} total, {} transient, {} external, {} aliased",
            s.total_resources, s.transient_resources, s.external_resources, s.aliased_resources
        )?;
        writeln!(out, "  barriers: {}", s.barrier_count)?;
        writeln!(out, "  transient memory: {} bytes", s.memory_usage)?;
        writeln!(
            out,
            "  compile: {:?}, execute: {:?}",
            s.compile_time, s.execute_time
        )?;
        Ok(())
    }

    /// Dependency graph in Graphviz DOT form.
    ///
    /// Passes are boxes (dashed when culled or disabled), resources are
    /// ellipses (blue external, red transient). Solid edges are writes and
    /// reads, dotted edges are pass dependencies.
    pub fn export_graphviz(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.write_graphviz(&mut out);
        out
    }

    fn write_graphviz(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "digraph RenderGraph {{")?;
        writeln!(out, "  rankdir=LR;")?;

        for info in &self.pass_infos {
            let style = if info.is_enabled() { "filled" } else { "dashed" };
            writeln!(
                out,
                "  pass_{} [label=\"{}\", shape=box, style={}];",
                info.pass_index,
                escape(&info.name),
                style
            )?;
        }

        for (id, resource) in &self.resources {
            let color = if resource.is_external() { "blue" } else { "red" };
            writeln!(
                out,
                "  res_{} [label=\"{}\", shape=ellipse, color={}];",
                id,
                escape(resource.handle.name()),
                color
            )?;
        }

        for info in &self.pass_infos {
            for (id, access) in &info.accesses {
                if access.is_write() {
                    writeln!(out, "  pass_{} -> res_{};", info.pass_index, id)?;
                }
                if access.is_read() {
                    writeln!(out, "  res_{} -> pass_{};", id, info.pass_index)?;
                }
            }
        }

        for (from, to) in &self.dependency_edges {
            writeln!(
                out,
                "  pass_{} -> pass_{} [style=dotted];",
                from.index(),
                to.index()
            )?;
        }

        writeln!(out, "}}")
    }
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}
