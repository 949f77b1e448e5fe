use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use fxgen_backend_core::{BackendOptions, BackendRegistry, GlobalAddrs, OutputContent, SimHandle};
use fxgen_cosim::{BehavioralSim, FloatCheck, Strictness, VerifyOptions};
use fxgen_graph::TensorKind;
use fxgen_lower::{pack_graph, plan, LayoutConfig, LowerOptions};

mod manifest;

/// fxgen — fixed-point NN graph to hardware compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input network manifest (JSON)
    input: PathBuf,

    /// Target backend (default: graph-dump)
    #[arg(short, long, default_value = "graph-dump")]
    target: String,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Right shift applied after the affine stage of every operator
    #[arg(long, default_value = "0")]
    rshift_out: u8,

    /// Address alignment chunk in bytes
    #[arg(long, default_value = "64")]
    chunk: usize,

    /// External bus width in bits
    #[arg(long, default_value = "32")]
    bus_width: u32,

    /// Dump the lowered graph to stderr before backend compilation
    #[arg(long)]
    emit_graph: bool,

    /// Lower and plan without producing output or co-simulating
    #[arg(long)]
    dry_run: bool,

    /// Skip the co-simulation run
    #[arg(long)]
    no_verify: bool,

    /// Fail the run when the float cross-check is out of tolerance
    #[arg(long)]
    strict_tolerance: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Read and parse the manifest.
    let text = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;
    let manifest = manifest::parse(&text)
        .into_diagnostic()
        .wrap_err("manifest parse failed")?;

    // 2. Build and lower the network.
    let opts = LowerOptions {
        rshift_out: cli.rshift_out,
        ..LowerOptions::default()
    };
    let (graph, output) = manifest::build_graph(&manifest, &opts)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("lowering failed")?;

    // 3. Optionally dump the lowered graph to stderr.
    if cli.emit_graph {
        eprintln!("{}", fxgen_graph::dump_graph(&graph));
    }

    // 4. Plan addresses and pack the image.
    let cfg = LayoutConfig {
        chunk: cli.chunk,
        bus_width: cli.bus_width,
        ..LayoutConfig::default()
    };
    let map = plan(&graph, &cfg)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("layout planning failed")?;
    let image = pack_graph(&graph, &map, &cfg)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("image packing failed")?;

    // 5. Dry-run: stop here.
    if cli.dry_run {
        return Ok(());
    }

    // 6. Backend dispatch.
    let registry = BackendRegistry::with_builtins();
    let backend = registry.find(&cli.target).ok_or_else(|| {
        let available = registry.list_targets().join(", ");
        miette::miette!("unknown target '{}' (available: {})", cli.target, available)
    })?;
    let backend_opts = BackendOptions {
        top_name: manifest.name.clone(),
    };
    let compiled = backend
        .compile(&graph, &map, &backend_opts)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("backend compilation failed")?;

    // 7. Print diagnostics.
    for diag in &compiled.diagnostics {
        eprintln!("{:?}: {}", diag.level, diag.message);
    }

    // 8. Write output.
    for file in &compiled.files {
        match (&cli.output, &file.content) {
            (Some(path), OutputContent::Text(text)) => {
                std::fs::write(path, text)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (Some(path), OutputContent::Binary(data)) => {
                std::fs::write(path, data)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            }
            (None, OutputContent::Text(text)) => {
                print!("{text}");
            }
            (None, OutputContent::Binary(_)) => {
                return Err(miette::miette!(
                    "backend produced binary output but no --output path was specified"
                ));
            }
        }
    }

    // 9. Co-simulate against the integer reference.
    if cli.no_verify {
        return Ok(());
    }

    let input = graph.inputs[0];
    let in_tensor = graph.tensors[input].clone();
    let out_tensor = graph.tensors[output].clone();
    let in_addr = map
        .addr_of(input)
        .ok_or_else(|| miette::miette!("input has no planned address"))?;
    let out_addr = map
        .addr_of(output)
        .ok_or_else(|| miette::miette!("output has no planned address"))?;
    let variables = map
        .regions
        .iter()
        .find(|r| graph.tensors[r.tensor].kind == TensorKind::Variable)
        .map(|r| r.addr)
        .unwrap_or(0);

    let feeds = {
        let mut feeds = std::collections::BTreeMap::new();
        feeds.insert(
            in_tensor.name.clone(),
            manifest::feed_for(&manifest, &in_tensor.name, in_tensor.len()),
        );
        feeds
    };
    let expected = fxgen_graph::eval_graph(&graph, &feeds)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("reference evaluation failed")?;

    let check_addr = map.check_addr;
    let tmp_addr = map.tmp_addr;
    let mut sim = BehavioralSim::new(graph, map, cfg, image);
    sim.image_mut()
        .write_tensor(
            &in_tensor,
            &feeds[&in_tensor.name],
            in_addr,
            in_tensor.align(cfg.bus_width),
        )
        .map_err(|e| miette::miette!("{e}"))?;
    sim.image_mut()
        .write_tensor(
            &out_tensor,
            &expected[0],
            check_addr,
            out_tensor.align(cfg.bus_width),
        )
        .map_err(|e| miette::miette!("{e}"))?;

    let verify_opts = VerifyOptions {
        float_check: manifest.float_reference.clone().map(|reference| FloatCheck {
            reference,
            scale: manifest.output_scale,
            tolerance: manifest.tolerance,
            strictness: if cli.strict_tolerance {
                Strictness::Enforce
            } else {
                Strictness::Warn
            },
        }),
    };
    let report = fxgen_cosim::run(
        &mut sim as &mut dyn SimHandle,
        GlobalAddrs {
            tmp: tmp_addr,
            out: out_addr,
            input: in_addr,
            variables,
        },
        &out_tensor,
        check_addr,
        cfg.bus_width,
        &verify_opts,
    )
    .map_err(|e| miette::miette!("{e}"))
    .wrap_err("verification run failed")?;

    eprintln!(
        "# {}: {:?} in {} cycles",
        manifest.name, report.state, report.cycles
    );
    for m in &report.mismatches {
        eprintln!("NG {:?} {} != {}", m.index, m.got, m.want);
    }
    if !report.passed() {
        return Err(miette::miette!(
            "verification failed: {} mismatch(es), {} tolerance violation(s)",
            report.mismatches.len(),
            report.tolerance_violations,
        ));
    }
    Ok(())
}
