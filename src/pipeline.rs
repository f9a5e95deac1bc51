//! Batch orchestration of the decode → merge → reconstruct stages.
//!
//! Every per-object failure is caught at the object boundary, logged and
//! skipped so one malformed export cannot abort a batch; only top-level
//! argument problems (unreadable catalog files, bad paths) propagate to the
//! caller.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{self, ArtifactError};
use crate::catalog::{
    self, CatalogError, PreparedCatalog, PreparedSegmentation, ReadyCatalog, ReadySegmentation,
    SelectedSegmentation, SelectionCatalog, SeriesCatalog,
};
use crate::decoder::{self, DecodeError};
use crate::enums::OutputFormat;
use crate::merge::{self, MergePlan};
use crate::nrrd::SegmentField;
use crate::reconstruct::{self, ReconstructError, SeriesCache};
use crate::resolver;
use crate::segmentation::SegmentationObject;
use crate::volume::mask_extent;
use crate::writer::{self, WriteError};

pub const PREPARED_CATALOG_FILE: &str = "PreparedSegmentations_info.json";
pub const READY_CATALOG_FILE: &str = "Ready2Volumes_info.json";
pub const ARTIFACTS_DIR: &str = "segmentation_artifacts";
pub const MERGE_PLAN_FILE: &str = "merge_plan.json";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("reconstruction error: {0}")]
    Reconstruct(#[from] ReconstructError),

    #[error("write error: {0}")]
    Write(#[from] WriteError),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("no segmentation file in {0}")]
    NoSegmentationFile(PathBuf),
}

/// Decode every selected segmentation into an artifact pair and write the
/// prepared catalog next to the selection catalog. Returns the prepared
/// catalog path.
pub fn decode_selected(
    selection_path: &Path,
    artifacts_dir: Option<&Path>,
) -> Result<PathBuf, PipelineError> {
    let selection: SelectionCatalog = catalog::load_json(selection_path)?;
    let base_dir = parent_dir(selection_path);
    let out_dir = artifacts_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_dir.join(ARTIFACTS_DIR));
    fs::create_dir_all(&out_dir)?;

    let mut prepared = PreparedCatalog::default();
    for (key, selected) in &selection.selected_segmentations {
        match decode_one(key, selected, &out_dir) {
            Ok(record) => {
                prepared
                    .selected_segmentations
                    .insert(key.clone(), record);
            }
            Err(err) => warn!(object = %key, error = %err, "skipping segmentation object"),
        }
    }

    let prepared_path = base_dir.join(PREPARED_CATALOG_FILE);
    catalog::save_json(&prepared_path, &prepared)?;
    info!(
        path = %prepared_path.display(),
        objects = prepared.selected_segmentations.len(),
        "wrote prepared catalog"
    );
    Ok(prepared_path)
}

fn decode_one(
    key: &str,
    selected: &SelectedSegmentation,
    out_dir: &Path,
) -> Result<PreparedSegmentation, PipelineError> {
    let folder = &selected.assessor_folder_path;
    if !folder.is_dir() {
        return Err(PipelineError::NotADirectory(folder.clone()));
    }
    let seg_path = find_segmentation_file(folder)?;
    let object = decoder::decode_segmentation_file(&seg_path)?;

    let stem = artifact::artifact_stem(selected.exported_name(), selected.segmentor_name(), key);
    let (artifact_file, sidecar_file) = artifact::artifact_paths(out_dir, &stem);
    artifact::write_artifact(&artifact_file, &object)?;
    artifact::write_sidecar(&sidecar_file, &object)?;
    info!(
        object = %key,
        frames = object.num_frames(),
        artifact = %artifact_file.display(),
        "decoded segmentation"
    );

    Ok(PreparedSegmentation {
        selection: selected.clone(),
        artifact_file,
        sidecar_file,
        num_frames: object.num_frames(),
        segment_name_count: object.segment_name_count(),
        ref_series_uid: object.ref_series_uid.clone(),
    })
}

/// The assessor folder of a segmentation export holds a single `.dcm`
/// file; take the first in name order if there happen to be several.
fn find_segmentation_file(folder: &Path) -> Result<PathBuf, PipelineError> {
    let mut files: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        })
        .collect();
    files.sort();
    files
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::NoSegmentationFile(folder.to_path_buf()))
}

/// Apply a merge plan to every prepared object, rewriting artifacts and
/// catalog counts in place.
pub fn apply_merge_plan(prepared_path: &Path, plan_path: &Path) -> Result<(), PipelineError> {
    let mut prepared: PreparedCatalog = catalog::load_json(prepared_path)?;
    let plan: MergePlan = catalog::load_json(plan_path)?;
    if plan.is_empty() {
        info!("merge plan is empty, nothing to do");
        return Ok(());
    }

    for (key, record) in &mut prepared.selected_segmentations {
        let directives = plan.directives_for(key);
        if directives.is_empty() {
            continue;
        }
        if let Err(err) = merge_one(key, record, &directives) {
            warn!(object = %key, error = %err, "skipping merges for object");
        }
    }

    catalog::save_json(prepared_path, &prepared)?;
    Ok(())
}

fn merge_one(
    key: &str,
    record: &mut PreparedSegmentation,
    directives: &[&merge::MergeDirective],
) -> Result<(), PipelineError> {
    let mut object = artifact::read_artifact(&record.artifact_file)?;
    let added = merge::apply_directives(&mut object, directives);
    if added == 0 {
        return Ok(());
    }

    artifact::write_artifact(&record.artifact_file, &object)?;
    artifact::write_sidecar(&record.sidecar_file, &object)?;
    record.num_frames = object.num_frames();
    record.segment_name_count = object.segment_name_count();
    info!(object = %key, frames_added = added, "updated artifact after merge");
    Ok(())
}

/// Resolve reference series, write the ready catalog, and generate one
/// intensity volume per referenced series plus one label volume per
/// (object, segment name). Returns the ready catalog path.
pub fn generate_volumes(
    prepared_path: &Path,
    series_catalog_path: &Path,
    out_dir: Option<&Path>,
    format: OutputFormat,
    overwrite: bool,
) -> Result<PathBuf, PipelineError> {
    let prepared: PreparedCatalog = catalog::load_json(prepared_path)?;
    let series_catalog: SeriesCatalog = catalog::load_json(series_catalog_path)?;
    let base_dir = parent_dir(prepared_path);

    let mut ready = ReadyCatalog::default();
    for (key, record) in prepared.selected_segmentations {
        let series_info =
            resolver::resolve_reference_series(record.ref_series_uid.as_deref(), &series_catalog)
                .cloned();
        ready
            .selected_segmentations
            .insert(key, ReadySegmentation {
                prepared: record,
                series_info,
            });
    }
    let ready_path = base_dir.join(READY_CATALOG_FILE);
    catalog::save_json(&ready_path, &ready)?;
    info!(path = %ready_path.display(), "wrote ready catalog");

    let out = out_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_dir.join(format.output_dir_name()));
    fs::create_dir_all(&out)?;

    let mut cache = SeriesCache::default();
    for (key, record) in &ready.selected_segmentations {
        if let Err(err) = generate_for_object(key, record, &mut cache, &out, format, overwrite) {
            warn!(object = %key, error = %err, "volume generation failed");
        }
    }
    Ok(ready_path)
}

fn generate_for_object(
    key: &str,
    record: &ReadySegmentation,
    cache: &mut SeriesCache,
    out: &Path,
    format: OutputFormat,
    overwrite: bool,
) -> Result<(), PipelineError> {
    let Some(series) = &record.series_info else {
        warn!(object = %key, "no reference series resolved, skipping volume generation");
        return Ok(());
    };
    let series_uid = series.series_uid.as_deref().unwrap_or_default();
    let loaded = cache.get_or_load(series_uid, &series.series_folder_path)?;

    let intensity_path = out.join(format!(
        "{}.{}",
        series.series_number,
        format.intensity_extension()
    ));
    if !writer::can_skip(&intensity_path, loaded.shape, format, overwrite) {
        writer::write_intensity_volume(&intensity_path, &loaded.volume, &loaded.affine, format)?;
    }

    let object = artifact::read_artifact(&record.prepared.artifact_file)?;
    for label in reconstruct::build_label_volumes(&object, &loaded) {
        let label_path = out.join(format!(
            "{}_ON_{}__FN_{}.{}",
            series.series_number,
            filename_component(&label.segment_name),
            key,
            format.label_extension()
        ));
        if writer::can_skip(&label_path, loaded.shape, format, overwrite) {
            continue;
        }
        let segment = SegmentField {
            name: label.segment_name.clone(),
            color: segment_color(&object, &label.segment_name),
            extent: mask_extent(&label.data),
            auto_named: label.segment_name.starts_with("Label_"),
        };
        writer::write_label_volume(&label_path, &label.data, &label.affine, &[segment], format)?;
    }
    Ok(())
}

/// Decode, optionally merge, then reconstruct in one pass.
pub fn run_all(
    selection_path: &Path,
    series_catalog_path: &Path,
    plan_path: Option<&Path>,
    artifacts_dir: Option<&Path>,
    out_dir: Option<&Path>,
    format: OutputFormat,
    overwrite: bool,
) -> Result<PathBuf, PipelineError> {
    let prepared_path = decode_selected(selection_path, artifacts_dir)?;
    if let Some(plan_path) = plan_path {
        apply_merge_plan(&prepared_path, plan_path)?;
    }
    generate_volumes(&prepared_path, series_catalog_path, out_dir, format, overwrite)
}

fn segment_color(object: &SegmentationObject, name: &str) -> Option<[u16; 3]> {
    object
        .frames
        .iter()
        .find(|frame| frame.segment_name.as_deref() == Some(name))
        .and_then(|frame| frame.segment_color)
}

fn filename_component(name: &str) -> String {
    name.replace([' ', '/'], "_")
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
