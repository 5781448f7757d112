// ============================================================
// Layer 1: CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to the pipeline API.
// Nothing here trains or persists on its own.
//
//   forgelearn fit         --data train.csv --export out
//   forgelearn predict     --model out --data test.csv
//   forgelearn pack        --workplace _logs/<timestamp>
//   forgelearn export-onnx --model out --output onnx
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, ExportOnnxArgs, FitArgs, PackArgs, PredictArgs};

use forgelearn::domain::NamedArrays;
use forgelearn::ml::onnx::DynamicAxes;
use forgelearn::prelude::*;

type B = CpuBackend;

#[derive(Parser, Debug)]
#[command(
    name = "forgelearn",
    version,
    about = "Fit, save, pack and export tabular deep-learning pipelines."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let registries = Arc::new(Registries::<B>::with_defaults()?);
        match self.command {
            Commands::Fit(args)        => run_fit(args, registries),
            Commands::Predict(args)    => run_predict(args, registries),
            Commands::Pack(args)       => run_pack(args),
            Commands::ExportOnnx(args) => run_export_onnx(args, registries),
        }
    }
}

fn run_fit(args: FitArgs, registries: Arc<Registries<B>>) -> Result<()> {
    let config = TabularConfig::try_from(&args)?;
    let data   = if args.data.is_dir() {
        TabularData::Folder(args.data.clone())
    } else {
        TabularData::Csv(args.data.clone())
    };

    let mut pipeline = TabularPipeline::<B>::new(config, registries).context("building pipeline")?;
    pipeline
        .fit(data, SampleWeights::None, args.device.as_deref())
        .with_context(|| format!("fitting on '{}'", args.data.display()))?;

    let options = SaveOptions { compress: !args.no_compress, retain_data: args.retain_data, ..SaveOptions::default() };
    pipeline
        .save(&args.export, options)
        .with_context(|| format!("saving to '{}'", args.export.display()))?;

    if let Some(results) = pipeline.final_results() {
        println!("final score: {:.6}", results.final_score);
    }
    if let Some(workplace) = pipeline.workplace() {
        println!("workplace:   {}", workplace.display());
    }
    println!("saved:       {}", args.export.display());
    Ok(())
}

fn run_predict(args: PredictArgs, registries: Arc<Registries<B>>) -> Result<()> {
    let pipeline = if args.onnx {
        TabularPipeline::<B>::from_onnx(&args.model, registries, FromOnnxOptions::default())
    } else {
        let options = LoadOptions { device: args.device.clone(), ..LoadOptions::default() };
        TabularPipeline::<B>::load(&args.model, registries, options)
    }
    .with_context(|| format!("loading '{}'", args.model.display()))?;

    let outputs = pipeline
        .predict(&TabularData::Csv(args.data.clone()), PredictOptions { batch_size: args.batch_size })
        .with_context(|| format!("predicting '{}'", args.data.display()))?;
    write_csv(&outputs, std::io::stdout().lock())
}

fn run_pack(args: PackArgs) -> Result<()> {
    let options = PackOptions { pack_folder: args.output.clone(), device: args.device.clone(), ..PackOptions::default() };
    let archive = TabularPipeline::<B>::pack(&args.workplace, options)
        .with_context(|| format!("packing '{}'", args.workplace.display()))?;
    println!("{}", archive.display());
    Ok(())
}

fn run_export_onnx(args: ExportOnnxArgs, registries: Arc<Registries<B>>) -> Result<()> {
    let mut pipeline = TabularPipeline::<B>::load(&args.model, registries, LoadOptions::default())
        .with_context(|| format!("loading '{}'", args.model.display()))?;
    let options = OnnxOptions {
        dynamic_axes: (!args.axes.is_empty()).then(|| DynamicAxes::Axes(args.axes.clone())),
        compress: !args.no_compress,
        ..OnnxOptions::default()
    };
    pipeline
        .to_onnx(&args.output, options)
        .with_context(|| format!("exporting to '{}'", args.output.display()))?;
    println!("exported:    {}", args.output.display());
    Ok(())
}

/// One column per output value: `name` for single columns, `name_i` otherwise.
fn write_csv(outputs: &NamedArrays, mut out: impl Write) -> Result<()> {
    let mut header = Vec::new();
    for (name, values) in outputs {
        match values.ncols() {
            1 => header.push(name.clone()),
            n => header.extend((0..n).map(|i| format!("{name}_{i}"))),
        }
    }
    writeln!(out, "{}", header.join(","))?;

    let rows = outputs.values().next().map_or(0, |v| v.nrows());
    for r in 0..rows {
        let cells: Vec<String> = outputs
            .values()
            .flat_map(|v| v.row(r).iter().map(|x| x.to_string()).collect::<Vec<_>>())
            .collect();
        writeln!(out, "{}", cells.join(","))?;
    }
    Ok(())
}
