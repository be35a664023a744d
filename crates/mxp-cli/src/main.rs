//! `mxp`: run CNN models on the MXP coprocessor simulator.
//!
//! ```text
//! USAGE:
//!   mxp info                         Coprocessor configuration and capabilities
//!   mxp zoo                          List built-in models
//!   mxp run --model <name> [...]     Run a model on an image or seeded input
//!   mxp conv-check [...]             Check the convolution engine against the reference
//! ```
//!
//! `run` exits with 0 on success, 1 on failure, 2 on allocation failure,
//! 3 on an unsupported layer or feature and 4 on an input size mismatch.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mxp_cnn::codec::{dequantize, quantize};
use mxp_cnn::reference::{max_abs_diff, reference_conv};
use mxp_cnn::zoo::{ConvCase, Xoshiro, ZooModel};
use mxp_cnn::{
    ArithMode, CnnError, ConvLayer, ConvStrategy, Layer, MapRef, Network, Pipeline, RawImage,
    RunStatus,
};
use mxp_driver::{select_backend, CoprocConfig, FracWidths};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mxp", about = "CNN inference on the MXP vector coprocessor", version)]
struct Cli {
    /// Vector lanes of the simulated coprocessor.
    #[arg(long, global = true, default_value_t = CoprocConfig::SIMULATOR.vector_lanes)]
    lanes: u32,

    /// Scratchpad size in KB.
    #[arg(long, global = true, default_value_t = CoprocConfig::SIMULATOR.scratchpad_kb)]
    scratchpad_kb: u32,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the coprocessor configuration and capabilities.
    Info,
    /// List built-in models.
    Zoo,
    /// Run a model end to end.
    Run {
        /// Model name (see `mxp zoo`).
        #[arg(long)]
        model: String,
        /// Headerless 8-bit image, planes stored one after another.
        #[arg(long)]
        image: Option<std::path::PathBuf>,
        /// Image width.
        #[arg(long, requires = "image")]
        width: Option<usize>,
        /// Image height.
        #[arg(long, requires = "image")]
        height: Option<usize>,
        /// Image channels.
        #[arg(long, default_value_t = 1)]
        channels: usize,
        /// Weight seed (and input seed when no image is given).
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Run every convolution on the scalar path.
        #[arg(long)]
        scalar: bool,
        /// Number of classes to print.
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Compare scalar float, scalar fixed and vector convolution with the
    /// float reference on the 3 → 10 map, 9×9 case.
    ConvCheck {
        /// Input seed.
        #[arg(long, default_value_t = ConvCase::SEEDS.0)]
        input_seed: u64,
        /// Kernel seed.
        #[arg(long, default_value_t = ConvCase::SEEDS.1)]
        kernel_seed: u64,
        /// Bias seed.
        #[arg(long, default_value_t = ConvCase::SEEDS.2)]
        bias_seed: u64,
        /// Vector block width (defaults to the output width).
        #[arg(long)]
        block_width: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = CoprocConfig {
        vector_lanes: cli.lanes,
        scratchpad_kb: cli.scratchpad_kb,
        ..CoprocConfig::SIMULATOR
    };

    match cli.command {
        Cmd::Info => cmd_info(config)?,
        Cmd::Zoo => cmd_zoo()?,
        Cmd::Run {
            model,
            image,
            width,
            height,
            channels,
            seed,
            scalar,
            top,
        } => {
            let image = match (image, width, height) {
                (Some(path), Some(w), Some(h)) => Some(ImageArgs {
                    path,
                    width: w,
                    height: h,
                    channels,
                }),
                (Some(_), _, _) => anyhow::bail!("--image needs --width and --height"),
                _ => None,
            };
            let status = cmd_run(config, &model, image.as_ref(), seed, scalar, top)?;
            if status != RunStatus::Success {
                std::process::exit(status.exit_code());
            }
        }
        Cmd::ConvCheck {
            input_seed,
            kernel_seed,
            bias_seed,
            block_width,
        } => cmd_conv_check(config, (input_seed, kernel_seed, bias_seed), block_width)?,
    }

    Ok(())
}

fn cmd_info(config: CoprocConfig) -> Result<()> {
    let coproc = select_backend(config)?;
    let caps = coproc.capabilities();
    let FracWidths { word, half, byte } = caps.config.frac;

    println!("Backend        : {}", coproc.backend_type());
    println!("Vector lanes   : {}", caps.lanes());
    println!(
        "Scratchpad     : {} KB ({} bytes)",
        caps.config.scratchpad_kb,
        caps.scratchpad_bytes()
    );
    println!("Masked waves   : {}", caps.config.max_masked_waves);
    println!("Frac bits      : word Q{word}, half Q{half}, byte Q{byte}");
    println!(
        "Max vector len : {} elements",
        caps.lanes() * caps.config.max_masked_waves as usize
    );
    Ok(())
}

fn cmd_zoo() -> Result<()> {
    for model in ZooModel::ALL {
        let net = Network::build(&model.config(0)?)?;
        println!("{:<12} {}  {}", model.name(), model.input(), model.description());
        for (i, node) in net.layers().iter().enumerate() {
            match node.as_layer() {
                Some(layer) => println!(
                    "    [{i}] {:<8} {:<6} {} -> {}",
                    layer.kind(),
                    layer.arith_mode(),
                    layer.input_geometry(),
                    layer.output_geometry()
                ),
                None => println!("    [{i}] {} (unsupported)", node.tag()),
            }
        }
        println!();
    }
    Ok(())
}

struct ImageArgs {
    path: std::path::PathBuf,
    width: usize,
    height: usize,
    channels: usize,
}

fn cmd_run(
    config: CoprocConfig,
    name: &str,
    image: Option<&ImageArgs>,
    seed: u64,
    scalar: bool,
    top: usize,
) -> Result<RunStatus> {
    let model = ZooModel::from_name(name)
        .ok_or_else(|| anyhow::anyhow!("Unknown model: {name} (see `mxp zoo`)"))?;

    let mut net = match Network::build(&model.config(seed)?) {
        Ok(net) => net,
        Err(e) => return Ok(report_failure(&e)),
    };
    if scalar {
        for i in 0..net.len() {
            if let Some(conv) = net.conv_mut(i) {
                conv.set_strategy(ConvStrategy::Scalar)?;
            }
        }
    }
    let mut coproc = select_backend(config)?;
    let mut pipeline = Pipeline::new();

    let result = match image {
        Some(args) => {
            let img = RawImage::from_file(&args.path, args.width, args.height, args.channels)
                .with_context(|| format!("reading {}", args.path.display()))?;
            pipeline.run_image(&mut net, coproc.as_mut(), &img)
        }
        None => {
            let input = Xoshiro::new(seed.wrapping_add(1)).gen_f32(model.input().len());
            pipeline.run(&mut net, coproc.as_mut(), &input, model.input())
        }
    };

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!(
                "Run stopped after {} of {} layers",
                pipeline.layers_executed(),
                net.len()
            );
            return Ok(report_failure(&e));
        }
    };

    let stats = coproc.stats();
    println!("Model        : {model}");
    println!("Output       : {}", report.geometry);
    println!("Layers       : {}", report.layers_executed);
    println!("Conversions  : {}", report.conversions);
    println!("Elapsed      : {:.3} ms", report.elapsed.as_secs_f64() * 1e3);
    println!(
        "Vector unit  : {} instructions, {} waves, {:.0}% lane utilisation",
        stats.instructions,
        stats.waves,
        stats.lane_utilisation(coproc.capabilities().lanes()) * 100.0
    );
    println!();
    for (rank, (class, p)) in report.top_k(top).into_iter().enumerate() {
        println!("  #{:<2} class {class:<3} {p:.4}", rank + 1);
    }
    Ok(RunStatus::Success)
}

fn report_failure(err: &CnnError) -> RunStatus {
    let status = RunStatus::from(err);
    eprintln!("Error ({status}): {err}");
    status
}

fn cmd_conv_check(
    config: CoprocConfig,
    (input_seed, kernel_seed, bias_seed): (u64, u64, u64),
    block_width: Option<usize>,
) -> Result<()> {
    let case = ConvCase::with_seeds(input_seed, kernel_seed, bias_seed)?;
    let p = case.params;
    let geometry = p.input_geometry();
    let mut coproc = select_backend(config)?;
    let expected = reference_conv(&p, &case.input, &case.kernel, &case.bias)?;

    let mut fixed_input = vec![0; case.input.len()];
    quantize(&case.input, p.map_frac_bits, &mut fixed_input);
    let fixed_view = MapRef::Fixed {
        data: &fixed_input,
        frac_bits: p.map_frac_bits,
    };

    println!(
        "Convolution  : {} -> {} (K={}, s={}, p={})",
        geometry,
        p.output_geometry()?,
        p.kernel_size,
        p.stride,
        p.pad
    );
    println!("Formats      : maps {}, kernel {}", p.map_frac_bits, p.kernel_frac_bits);

    let runs = [
        ("scalar float", ArithMode::Float, ConvStrategy::Scalar),
        ("scalar fixed", ArithMode::Fixed, ConvStrategy::Scalar),
        ("vector fixed", ArithMode::Fixed, ConvStrategy::Vector),
    ];
    for (label, mode, strategy) in runs {
        let mut conv = ConvLayer::new(p, mode, strategy, &case.kernel, &case.bias)?;
        if let (ConvStrategy::Vector, Some(bw)) = (strategy, block_width) {
            conv.set_block_width(bw)?;
        }
        coproc.reset_stats();
        let input = match mode {
            ArithMode::Float => MapRef::Float(&case.input),
            ArithMode::Fixed => fixed_view,
        };
        let out = conv.compute(input, geometry, coproc.as_mut())?;

        let n = out.geometry.len();
        let got = match mode {
            ArithMode::Float => conv.output().float()[..n].to_vec(),
            ArithMode::Fixed => {
                let mut v = vec![0.0; n];
                dequantize(&conv.output().fixed()[..n], p.map_frac_bits, &mut v);
                v
            }
        };
        println!(
            "{label:<13}: max |diff| {:.6}  ({} vector instructions)",
            max_abs_diff(&got, &expected),
            coproc.stats().instructions
        );
    }

    let conv = ConvLayer::new(p, ArithMode::Fixed, ConvStrategy::Vector, &case.kernel, &case.bias)?;
    if let Some(ext) = conv.extended_kernel() {
        println!(
            "Ext. kernel  : {} rows × {} coefficients ({} bytes)",
            ext.in_maps() * ext.taps_per_map(),
            ext.out_maps() * ext.block_width(),
            ext.size_bytes()
        );
    }
    Ok(())
}
