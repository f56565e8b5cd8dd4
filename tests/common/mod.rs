//! Shared passes and helpers for render graph integration tests.

use std::sync::Arc;

use frame_graph::backend::dummy::{DummyContext, DummyDevice};
use frame_graph::render_graph::*;
use parking_lot::Mutex;

/// Names of passes in the order their `execute` ran
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Graph over a fresh dummy device
pub fn new_graph(settings: GraphSettings) -> (RenderGraph, Arc<DummyDevice>) {
    init_logger();
    let device = Arc::new(DummyDevice::new());
    let graph = RenderGraph::with_settings(device.clone(), settings);
    (graph, device)
}

/// Configurable pass that declares fixed dependencies and records its execution.
pub struct TestPass {
    name: String,
    reads: Vec<ResourceHandle>,
    writes: Vec<ResourceHandle>,
    read_writes: Vec<ResourceHandle>,
    params: Vec<(String, f32)>,
    log: CallLog,
    fail: bool,
    enabled: bool,
}

#[allow(dead_code)]
impl TestPass {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            reads: Vec::new(),
            writes: Vec::new(),
            read_writes: Vec::new(),
            params: Vec::new(),
            log: log.clone(),
            fail: false,
            enabled: true,
        }
    }

    pub fn reads(mut self, handles: &[&ResourceHandle]) -> Self {
        self.reads.extend(handles.iter().map(|h| (*h).clone()));
        self
    }

    pub fn writes(mut self, handles: &[&ResourceHandle]) -> Self {
        self.writes.extend(handles.iter().map(|h| (*h).clone()));
        self
    }

    pub fn read_writes(mut self, handles: &[&ResourceHandle]) -> Self {
        self.read_writes.extend(handles.iter().map(|h| (*h).clone()));
        self
    }

    pub fn param(mut self, name: &str, value: f32) -> Self {
        self.params.push((name.to_string(), value));
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl RenderPass for TestPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        for handle in &self.reads {
            ctx.read(handle);
        }
        for handle in &self.writes {
            ctx.write(handle);
        }
        for handle in &self.read_writes {
            ctx.read_write(handle);
        }
        for (name, value) in &self.params {
            ctx.set_float(name, *value);
        }
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        for handle in self.reads.iter().chain(&self.writes).chain(&self.read_writes) {
            if handle.desc().is_buffer() {
                ctx.buffer(handle)?;
            } else {
                ctx.texture(handle)?;
            }
        }

        let mut entry = self.name.clone();
        for (name, _) in &self.params {
            entry.push_str(&format!(" {}={}", name, ctx.get_float(name, -1.0)));
        }
        self.log.lock().push(entry);

        if self.fail {
            return Err(PassError::Failed(format!("{} exploded", self.name)));
        }
        if let Some(dummy) = ctx.context_as::<DummyContext>() {
            dummy.marker(self.name.clone());
        }
        Ok(())
    }

    fn is_enabled(&self, _ctx: &PassSetupContext) -> bool {
        self.enabled
    }
}

/// Names of the passes in the compiled execution order
pub fn order_names(graph: &RenderGraph) -> Vec<String> {
    graph
        .execution_order()
        .iter()
        .filter_map(|&id| graph.pass_info(id))
        .map(|info| info.name.clone())
        .collect()
}
