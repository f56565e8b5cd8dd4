//! Headless frame graph demo.
//!
//! Builds a small deferred pipeline (depth prepass, G-buffer, lighting,
//! optional bloom, tone mapping into an imported back buffer, plus a debug
//! pass nothing consumes) over the dummy backend, compiles it and records a
//! few frames.
//!
//! ```bash
//! # Compile and run three frames at 1080p
//! frame_graph_demo --width 1920 --height 1080 --frames 3
//!
//! # Inspect the graph
//! frame_graph_demo --dump --graphviz graph.dot
//!
//! # See what aliasing saves
//! frame_graph_demo --no-aliasing
//! ```

use clap::Parser;
use frame_graph::backend::dummy::{DummyContext, DummyDevice};
use frame_graph::backend::*;
use frame_graph::render_graph::*;
use std::process::ExitCode;
use std::sync::Arc;

/// Frame graph demo arguments.
#[derive(Parser, Debug)]
#[command(
    name = "frame_graph_demo",
    about = "Compile and execute a deferred frame graph on the dummy backend",
    version
)]
struct Args {
    /// Render target width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Render target height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of frames to execute.
    #[arg(long, default_value = "1")]
    frames: u32,

    /// Skip the bloom pass.
    #[arg(long)]
    no_bloom: bool,

    /// Keep passes that contribute to no output.
    #[arg(long)]
    no_culling: bool,

    /// Give every transient its own memory.
    #[arg(long)]
    no_aliasing: bool,

    /// Skip descriptor and pass name checks.
    #[arg(long)]
    no_validation: bool,

    /// Print the graph's debug dump after compiling.
    #[arg(long)]
    dump: bool,

    /// Write the dependency graph in DOT format to this file.
    #[arg(long)]
    graphviz: Option<std::path::PathBuf>,
}

impl From<&Args> for GraphSettings {
    fn from(args: &Args) -> Self {
        Self {
            enable_resource_aliasing: !args.no_aliasing,
            enable_pass_culling: !args.no_culling,
            enable_validation: !args.no_validation,
            ..Default::default()
        }
    }
}

fn marker(ctx: &mut PassExecuteData, text: String) {
    if let Some(dummy) = ctx.context_as::<DummyContext>() {
        dummy.marker(text);
    }
}

struct DepthPrepass {
    depth: ResourceHandle,
}

impl RenderPass for DepthPrepass {
    fn name(&self) -> &str {
        "DepthPrepass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.add_output("depth", &self.depth);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        let depth = ctx.texture(ctx.output("depth")?)?;
        let text = format!("depth prepass {}x{}", depth.width(), depth.height());
        marker(ctx, text);
        Ok(())
    }

    fn category(&self) -> &str {
        "Geometry"
    }
}

struct GBufferPass {
    depth: ResourceHandle,
    albedo: ResourceHandle,
    normal: ResourceHandle,
}

impl RenderPass for GBufferPass {
    fn name(&self) -> &str {
        "GBuffer"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(&self.depth);
        ctx.add_output("albedo", &self.albedo);
        ctx.add_output("normal", &self.normal);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        ctx.texture(ctx.output("albedo")?)?;
        ctx.texture(ctx.output("normal")?)?;
        marker(ctx, "gbuffer".to_string());
        Ok(())
    }

    fn category(&self) -> &str {
        "Geometry"
    }
}

struct LightingPass {
    depth: ResourceHandle,
    albedo: ResourceHandle,
    normal: ResourceHandle,
    hdr: ResourceHandle,
    light_count: i32,
}

impl RenderPass for LightingPass {
    fn name(&self) -> &str {
        "Lighting"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.add_input("depth", &self.depth);
        ctx.add_input("albedo", &self.albedo);
        ctx.add_input("normal", &self.normal);
        ctx.add_output("hdr", &self.hdr);
        ctx.set_int("light_count", self.light_count);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        for input in ["depth", "albedo", "normal"] {
            ctx.texture(ctx.input(input)?)?;
        }
        let lights = ctx.get_int("light_count", 0);
        marker(ctx, format!("lighting with {} lights", lights));
        Ok(())
    }

    fn category(&self) -> &str {
        "Lighting"
    }
}

/// Downsample and blur the HDR target through a scratch texture it creates itself
struct BloomPass {
    hdr: ResourceHandle,
    scratch: ResourceHandle,
    enabled: bool,
}

impl RenderPass for BloomPass {
    fn name(&self) -> &str {
        "Bloom"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let desc = self.hdr.desc();
        self.scratch = ctx.create_texture(
            "BloomScratch",
            ResourceDesc::texture_2d(
                (desc.width / 2).max(1),
                (desc.height / 2).max(1),
                TextureFormat::Rgba16Float,
                ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE,
                "BloomScratch",
                1,
            ),
        );
        ctx.write(&self.scratch);
        ctx.read_write(&self.hdr);
        ctx.set_float("threshold", 1.0);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        ctx.texture(&self.scratch)?;
        let threshold = ctx.get_float("threshold", 0.0);
        marker(ctx, format!("bloom above {:.1}", threshold));
        Ok(())
    }

    fn is_enabled(&self, _ctx: &PassSetupContext) -> bool {
        self.enabled
    }

    fn category(&self) -> &str {
        "PostProcess"
    }
}

struct TonemapPass {
    hdr: ResourceHandle,
    backbuffer: ResourceHandle,
    exposure: f32,
}

impl RenderPass for TonemapPass {
    fn name(&self) -> &str {
        "Tonemap"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.add_input("hdr", &self.hdr);
        ctx.add_output("backbuffer", &self.backbuffer);
        ctx.set_float("exposure", self.exposure);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        ctx.texture(ctx.input("hdr")?)?;
        ctx.texture(ctx.output("backbuffer")?)?;
        let exposure = ctx.get_float("exposure", 1.0);
        marker(ctx, format!("tonemap at exposure {:.2}", exposure));
        Ok(())
    }

    fn category(&self) -> &str {
        "PostProcess"
    }
}

/// Writes a visualization nobody reads; culled unless culling is off
struct DebugViewPass {
    target: ResourceHandle,
}

impl RenderPass for DebugViewPass {
    fn name(&self) -> &str {
        "DebugView"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(&self.target);
    }

    fn execute(&self, ctx: &mut PassExecuteData) -> Result<(), PassError> {
        marker(ctx, "debug view".to_string());
        Ok(())
    }

    fn category(&self) -> &str {
        "Debug"
    }
}

fn build_graph(args: &Args, device: &Arc<DummyDevice>) -> RenderGraph {
    let (width, height) = (args.width, args.height);
    let mut graph = RenderGraph::with_settings(device.clone(), GraphSettings::from(args));

    let swapchain = device.external_texture(&ResourceDesc::texture_2d(
        width,
        height,
        TextureFormat::Bgra8UnormSrgb,
        ResourceUsage::RENDER_TARGET | ResourceUsage::COPY_DST,
        "Swapchain",
        1,
    ));

    let mut builder = graph.builder();
    let depth = builder.create_depth_target("Depth", width, height);
    let albedo = builder.create_color_target("Albedo", width, height);
    let normal = builder.create_color_target_with_format("Normal", width, height, TextureFormat::Rgb10a2Unorm);
    let hdr = builder.create_color_target_with_format("HDR", width, height, TextureFormat::Rgba16Float);
    let debug = builder.create_color_target("DebugView", width, height);
    let backbuffer = builder.import_texture("Backbuffer", swapchain, ResourceState::Common);
    builder.set_final_output(&backbuffer);
    drop(builder);

    graph.add_pass(DepthPrepass {
        depth: depth.clone(),
    });
    graph.add_pass(GBufferPass {
        depth: depth.clone(),
        albedo: albedo.clone(),
        normal: normal.clone(),
    });
    graph.add_pass(LightingPass {
        depth,
        albedo,
        normal,
        hdr: hdr.clone(),
        light_count: 16,
    });
    graph.add_pass(BloomPass {
        hdr: hdr.clone(),
        scratch: ResourceHandle::invalid(),
        enabled: !args.no_bloom,
    });
    graph.add_pass(TonemapPass {
        hdr,
        backbuffer,
        exposure: 1.0,
    });
    graph.add_pass(DebugViewPass { target: debug });

    graph
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let device = Arc::new(DummyDevice::new());
    let mut graph = build_graph(args, &device);
    graph.compile()?;

    if args.dump {
        println!("{}", graph.dump_debug_info());
    }
    if let Some(path) = &args.graphviz {
        std::fs::write(path, graph.export_graphviz())?;
        log::info!("Wrote dependency graph to {}", path.display());
    }

    let mut ctx = DummyContext::new();
    for frame in 0..args.frames {
        ctx.clear();
        graph.execute(&mut ctx)?;
        log::info!(
            "Frame {}: {} passes, {} barriers recorded",
            frame,
            graph.stats().executed_passes,
            ctx.barrier_count()
        );
        for text in ctx.markers() {
            log::debug!("  {}", text);
        }
    }

    let stats = graph.stats();
    println!(
        "{} of {} passes executed ({} culled, {} disabled)",
        stats.executed_passes, stats.total_passes, stats.culled_passes, stats.disabled_passes
    );
    println!(
        "{} resources ({} transient, {} external, {} aliased), {:.1} MiB transient memory",
        stats.total_resources,
        stats.transient_resources,
        stats.external_resources,
        stats.aliased_resources,
        stats.memory_usage as f64 / (1024.0 * 1024.0)
    );
    println!(
        "{} textures created on the device, compile {:?}, last frame {:?}",
        device.textures_created(),
        stats.compile_time,
        stats.execute_time
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
