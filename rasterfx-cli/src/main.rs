//! # RasterFX CLI
//!
//! Loads an image into a canvas, applies one filter and writes the result.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use rasterfx_core::{
    ApplyReport, Canvas, EngineConfig, FilterEngine, FilterOperation, RenderBackend,
    SoftwareBackend, WgpuBackend, WgpuProgram,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// GPU when available, software otherwise
    Auto,
    Gpu,
    Software,
}

#[derive(Parser, Debug)]
#[command(name = "rasterfx")]
#[command(about = "Apply GPU filter effects to an image")]
#[command(version)]
struct Args {
    /// Image to read
    #[arg(short, long, required_unless_present = "list")]
    input: Option<PathBuf>,

    /// Where to write the filtered image
    #[arg(short, long, required_unless_present = "list")]
    output: Option<PathBuf>,

    /// Operation name (see --list)
    #[arg(short, long, default_value = "blur")]
    filter: String,

    /// Filter parameter; defaults per operation
    #[arg(short, long)]
    param: Option<f32>,

    /// Device pixel density of the canvas
    #[arg(short, long, default_value_t = 1.0)]
    density: f32,

    #[arg(short, long, value_enum, default_value_t = BackendKind::Auto)]
    backend: BackendKind,

    /// WGSL fragment replacing the catalogue program (GPU only)
    #[arg(long)]
    custom: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List operations and exit
    #[arg(long)]
    list: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "rasterfx=debug,wgpu=warn"
    } else {
        "rasterfx=info,wgpu=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn list_operations() {
    for op in FilterOperation::ALL {
        println!("{:<10} default parameter {}", op.name(), op.default_parameter());
    }
}

/// Configure and run one filter over the canvas
fn apply<B: RenderBackend>(
    engine: &mut FilterEngine<B>,
    canvas: &mut Canvas,
    filter: &str,
    parameter: f32,
    custom: Option<B::Program>,
) -> Result<ApplyReport> {
    engine
        .set_operation_named(filter, parameter, custom)
        .with_context(|| format!("cannot configure filter '{}'", filter))?;
    let report = engine.apply_filter(canvas).context("filter was not applied")?;

    let stats = engine.stats();
    info!(
        backend = engine.backend().map(|b| b.name()).unwrap_or("none"),
        stats = %serde_json::to_string(&stats)?,
        "Filter finished"
    );
    Ok(report)
}

/// A custom file with its own bindings is used whole; otherwise it is a
/// body written against the prelude
fn load_custom(backend: &mut WgpuBackend, path: &Path) -> Result<WgpuProgram> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read custom shader {}", path.display()))?;
    let label = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("custom");

    let program = if source.contains("@group(") {
        backend.program_from_wgsl(label, &source)
    } else {
        backend.filter_program(label, &source)
    };
    program.with_context(|| format!("custom shader {} failed to compile", path.display()))
}

fn run_gpu(
    mut backend: WgpuBackend,
    args: &Args,
    canvas: &mut Canvas,
    parameter: f32,
) -> Result<ApplyReport> {
    let custom = match &args.custom {
        Some(path) => Some(load_custom(&mut backend, path)?),
        None => None,
    };
    info!(adapter = backend.adapter_name(), "Using GPU backend");
    let mut engine = FilterEngine::new(backend, &*canvas);
    apply(&mut engine, canvas, &args.filter, parameter, custom)
}

fn run_software(
    config: &EngineConfig,
    args: &Args,
    canvas: &mut Canvas,
    parameter: f32,
) -> Result<ApplyReport> {
    if args.custom.is_some() {
        bail!("--custom needs the GPU backend");
    }
    info!("Using software backend");
    let mut engine = FilterEngine::new(SoftwareBackend::new(config.sampling), &*canvas);
    apply(&mut engine, canvas, &args.filter, parameter, None)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    if args.list {
        list_operations();
        return Ok(());
    }

    let (Some(input), Some(output)) = (&args.input, &args.output) else {
        bail!("--input and --output are required");
    };

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let image = image::open(input)
        .with_context(|| format!("cannot open {}", input.display()))?
        .to_rgba8();
    let mut canvas = Canvas::from_image(image, args.density);

    let parameter = args.param.unwrap_or_else(|| {
        args.filter
            .parse::<FilterOperation>()
            .map(|op| op.default_parameter())
            .unwrap_or(1.0)
    });

    let report = match args.backend {
        BackendKind::Software => run_software(&config, &args, &mut canvas, parameter)?,
        BackendKind::Gpu => {
            let backend = WgpuBackend::new(&config).context("GPU backend unavailable")?;
            run_gpu(backend, &args, &mut canvas, parameter)?
        }
        BackendKind::Auto => match WgpuBackend::new(&config) {
            Ok(backend) => run_gpu(backend, &args, &mut canvas, parameter)?,
            Err(e) => {
                warn!("{}, falling back to software", e);
                run_software(&config, &args, &mut canvas, parameter)?
            }
        },
    };

    canvas
        .into_image()
        .save(output)
        .with_context(|| format!("cannot write {}", output.display()))?;

    info!(
        passes = report.passes,
        custom = report.custom,
        output = %output.display(),
        "Done"
    );
    Ok(())
}
