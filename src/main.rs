use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dicom_segvol::enums::OutputFormat;
use dicom_segvol::pipeline;

#[derive(Parser)]
#[command(
    name = "segvol",
    version,
    about = "Decode DICOM Segmentation objects and reconstruct aligned label volumes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode selected segmentations into intermediate artifacts.
    Decode {
        /// Selection catalog (SelectedSegmentations_info.json).
        #[arg(long)]
        selection: PathBuf,
        /// Artifact directory; defaults to `segmentation_artifacts` beside
        /// the selection catalog.
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
    },
    /// Apply a merge plan to decoded artifacts.
    Merge {
        /// Prepared catalog (PreparedSegmentations_info.json).
        #[arg(long)]
        prepared: PathBuf,
        /// Merge plan; defaults to `merge_plan.json` beside the catalog.
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Reconstruct intensity and label volumes.
    Volumes {
        /// Prepared catalog (PreparedSegmentations_info.json).
        #[arg(long)]
        prepared: PathBuf,
        /// Series catalog (StudySeries_info.json).
        #[arg(long)]
        series: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Nifti)]
        format: OutputFormat,
        /// Output directory; defaults to `NIFTI`/`NRRD` beside the catalog.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Regenerate outputs even when a correctly-shaped file exists.
        #[arg(long)]
        overwrite: bool,
    },
    /// Decode, merge (when a plan exists) and reconstruct in one pass.
    Run {
        #[arg(long)]
        selection: PathBuf,
        #[arg(long)]
        series: PathBuf,
        /// Merge plan; defaults to `merge_plan.json` beside the selection
        /// catalog when that file exists.
        #[arg(long)]
        plan: Option<PathBuf>,
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Nifti)]
        format: OutputFormat,
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segvol=info,dicom_segvol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Decode {
            selection,
            artifacts_dir,
        } => {
            let prepared = pipeline::decode_selected(&selection, artifacts_dir.as_deref())
                .context("decoding selected segmentations failed")?;
            println!("Prepared catalog: {}", prepared.display());
        }
        Command::Merge { prepared, plan } => {
            let plan = plan.unwrap_or_else(|| sibling(&prepared, pipeline::MERGE_PLAN_FILE));
            pipeline::apply_merge_plan(&prepared, &plan)
                .with_context(|| format!("applying merge plan {} failed", plan.display()))?;
        }
        Command::Volumes {
            prepared,
            series,
            format,
            out_dir,
            overwrite,
        } => {
            let ready =
                pipeline::generate_volumes(&prepared, &series, out_dir.as_deref(), format, overwrite)
                    .context("volume generation failed")?;
            println!("Ready catalog: {}", ready.display());
        }
        Command::Run {
            selection,
            series,
            plan,
            artifacts_dir,
            format,
            out_dir,
            overwrite,
        } => {
            // An explicit plan must exist; the implicit sibling default is
            // only used when present.
            let plan = plan.or_else(|| {
                let default = sibling(&selection, pipeline::MERGE_PLAN_FILE);
                default.exists().then_some(default)
            });
            let ready = pipeline::run_all(
                &selection,
                &series,
                plan.as_deref(),
                artifacts_dir.as_deref(),
                out_dir.as_deref(),
                format,
                overwrite,
            )
            .context("pipeline run failed")?;
            println!("Ready catalog: {}", ready.display());
        }
    }
    Ok(())
}

fn sibling(path: &std::path::Path, file_name: &str) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(file_name),
        _ => PathBuf::from(file_name),
    }
}
