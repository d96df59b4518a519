use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use municipal_edu_stats::export::{self, OutputFormat};
use municipal_edu_stats::{logging, InputPaths, Pipeline, PipelineConfig, Table};

#[derive(Parser)]
#[command(name = "edu-stats", version, about = "Join municipal enrollment, expenditure and poverty statistics")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Directory searched (recursively) for the input CSV files
    #[arg(long, short = 'd', default_value = ".")]
    data_dir: PathBuf,

    /// JSON pipeline configuration; defaults apply when omitted
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Keep VMBO tracks apart instead of collapsing them
    #[arg(long)]
    split_vmbo: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Build the merged table and write it out
    Merge {
        #[command(flatten)]
        common: Common,

        /// Output file
        #[arg(long, short = 'o', default_value = "merged.csv")]
        output: PathBuf,

        /// Output format: csv or json
        #[arg(long, short = 'f', default_value = "csv")]
        format: OutputFormat,

        /// Drop rows with any missing value
        #[arg(long)]
        full_data_only: bool,

        /// Also write the run report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print a summary of every source table and the merged table
    Inspect {
        #[command(flatten)]
        common: Common,
    },
    /// Re-check derived totals against their constituents
    Verify {
        #[command(flatten)]
        common: Common,

        /// Absolute tolerance for the comparisons
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
    },
}

fn main() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Command::Merge {
            common,
            output,
            format,
            full_data_only,
            report,
        } => run_merge(&common, &output, format, full_data_only, report.as_deref()),
        Command::Inspect { common } => run_inspect(&common),
        Command::Verify { common, tolerance } => run_verify(&common, tolerance),
    }
}

fn load_config(common: &Common) -> Result<PipelineConfig> {
    let mut config = match &common.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.split_vmbo |= common.split_vmbo;
    Ok(config)
}

fn prepare(common: &Common, full_data_only: bool) -> Result<(Pipeline, InputPaths)> {
    let mut config = load_config(common)?;
    config.full_data_only |= full_data_only;
    let pipeline = Pipeline::new(config).context("Invalid pipeline configuration")?;
    let paths = InputPaths::discover(&common.data_dir)
        .with_context(|| format!("Failed to find input files in {}", common.data_dir.display()))?;
    Ok((pipeline, paths))
}

fn run_merge(
    common: &Common,
    output: &Path,
    format: OutputFormat,
    full_data_only: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    let (pipeline, paths) = prepare(common, full_data_only)?;
    let result = pipeline.run(&paths).context("Pipeline run failed")?;

    export::write_file(&result.merged, output, format)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(output = %output.display(), rows = result.merged.len(), "merged table written");

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&result.report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    println!("✓ {} rows, {} columns → {}", result.merged.len(), result.merged.columns().len(), output.display());
    println!("  run {}", result.report.run_id);
    for (source, summary) in &result.report.defects {
        println!(
            "  ⚠️  {}: {} rejected rows ({} critical), {} unmatched labels",
            source, summary.defects, summary.critical, summary.unmatched_categories
        );
    }
    Ok(())
}

fn print_table_summary(table: &Table) {
    println!("📋 {}", table.name());
    println!("   rows:           {}", table.len());
    println!("   municipalities: {}", table.municipalities().len());
    if !table.key_names().is_empty() {
        println!("   extra keys:     {}", table.key_names().join(", "));
    }
    println!("   columns:        {}", table.columns().join(", "));
}

fn run_inspect(common: &Common) -> Result<()> {
    let (pipeline, paths) = prepare(common, false)?;
    let result = pipeline.run(&paths).context("Pipeline run failed")?;

    for table in [
        &result.sources.enrollment,
        &result.sources.expenditure,
        &result.sources.poverty,
        &result.merged,
    ] {
        print_table_summary(table);
    }

    let complete = export::complete_municipalities(&result.merged);
    println!("✓ {} municipalities with complete data", complete.len());
    println!(
        "  {} rejected rows, {} unmatched labels",
        result.defects.defects().len(),
        result.defects.warnings().len()
    );
    Ok(())
}

fn run_verify(common: &Common, tolerance: f64) -> Result<()> {
    if tolerance.is_nan() || tolerance < 0.0 {
        bail!("tolerance must be a non-negative number");
    }
    let (pipeline, paths) = prepare(common, false)?;
    let (sources, _) = pipeline.build_sources(&paths).context("Pipeline run failed")?;
    let report = pipeline.verify_with_tolerance(&sources, tolerance)?;

    println!("{}", report.summary());
    for check in &report.checks {
        let mark = if check.is_balanced() { "✓" } else { "✗" };
        println!("  {} {} ({} rows)", mark, check.check, check.rows_checked);
        for d in check.discrepancies.iter().take(5) {
            println!(
                "      {} {}: expected {:?}, found {:?} ({:?})",
                d.key, d.column, d.expected, d.actual, d.category
            );
        }
    }

    if !report.is_balanced() {
        bail!("{} discrepancies found", report.discrepancy_count());
    }
    Ok(())
}
