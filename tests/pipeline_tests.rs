//! Integration tests for the artifact-backed merge and volume stages.
//!
//! These drive the pipeline through the same catalog and artifact files the
//! CLI uses, without needing DICOM fixtures on disk: segmentation objects
//! are constructed directly and persisted through the artifact layer.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::array;

use dicom_segvol::artifact;
use dicom_segvol::catalog::{
    PreparedCatalog, PreparedSegmentation, ReadyCatalog, SelectedSegmentation, SeriesCatalog,
    SeriesRecord, save_json,
};
use dicom_segvol::enums::OutputFormat;
use dicom_segvol::pipeline;
use dicom_segvol::segmentation::{Frame, SegmentationObject};

fn sample_object() -> SegmentationObject {
    // Two slices: A covers both, B only the second, overlapping A there.
    let frame = |index: usize, number: u16, name: &str, slice: u32, data| Frame {
        frame_index: index,
        segment_number: Some(number),
        segment_name: Some(name.to_string()),
        segment_color: None,
        image_position: Some([0.0, 0.0, slice as f64]),
        ref_sop_uid: Some(format!("1.2.3.{slice}")),
        data,
    };
    SegmentationObject {
        name: "Export".into(),
        segmentation_type: "BINARY".into(),
        ref_series_uid: Some("1.2.840.5".into()),
        ref_sop_class_uid: None,
        pixel_spacing: Some([0.7, 0.7]),
        slice_thickness: Some(2.5),
        spacing_between_slices: None,
        image_orientation: None,
        rows: 1,
        columns: 2,
        frames: vec![
            frame(0, 1, "A", 1, array![[1, 0]]),
            frame(1, 1, "A", 2, array![[1, 1]]),
            frame(2, 2, "B", 2, array![[1, 0]]),
        ],
    }
}

/// Persist an object and its catalog record the way the decode stage does.
fn prepare_workspace(dir: &Path, object: &SegmentationObject) -> PathBuf {
    let artifacts_dir = dir.join("segmentation_artifacts");
    fs::create_dir_all(&artifacts_dir).unwrap();
    let (artifact_file, sidecar_file) = artifact::artifact_paths(&artifacts_dir, "EN_E_SN_S_FN_SEG_1");
    artifact::write_artifact(&artifact_file, object).unwrap();
    artifact::write_sidecar(&sidecar_file, object).unwrap();

    let prepared = PreparedCatalog {
        selected_segmentations: BTreeMap::from([(
            "SEG_1".to_string(),
            PreparedSegmentation {
                selection: SelectedSegmentation {
                    assessor_folder_path: dir.join("ASSESSORS/SEG_1"),
                    exported_name: Some("E".into()),
                    segmentor_name: Some("S".into()),
                },
                artifact_file,
                sidecar_file,
                num_frames: object.num_frames(),
                segment_name_count: object.segment_name_count(),
                ref_series_uid: object.ref_series_uid.clone(),
            },
        )]),
    };
    let prepared_path = dir.join("PreparedSegmentations_info.json");
    save_json(&prepared_path, &prepared).unwrap();
    prepared_path
}

fn write_merge_plan(dir: &Path) -> PathBuf {
    let plan_path = dir.join("merge_plan.json");
    fs::write(
        &plan_path,
        r#"{
            "merge_plan": {
                "all": [
                    { "old_objects": ["A", "B"], "new_object": "C" }
                ]
            }
        }"#,
    )
    .unwrap();
    plan_path
}

// ---------------------------------------------------------------------------
// Merge stage
// ---------------------------------------------------------------------------

/// Applying a wildcard merge plan appends the merged segment to the
/// artifact and updates the catalog counts, leaving original frames intact.
#[test]
fn merge_stage_appends_merged_segment_and_updates_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let object = sample_object();
    let prepared_path = prepare_workspace(dir.path(), &object);
    let plan_path = write_merge_plan(dir.path());

    pipeline::apply_merge_plan(&prepared_path, &plan_path).unwrap();

    let catalog: PreparedCatalog =
        dicom_segvol::catalog::load_json(&prepared_path).unwrap();
    let record = &catalog.selected_segmentations["SEG_1"];
    assert_eq!(record.num_frames, 5);
    assert_eq!(record.segment_name_count["C"], 2);
    assert_eq!(record.segment_name_count["A"], 2);

    let merged = artifact::read_artifact(&record.artifact_file).unwrap();
    assert_eq!(&merged.frames[..3], &object.frames[..]);

    let c_frames: Vec<&Frame> = merged
        .frames
        .iter()
        .filter(|f| f.segment_name.as_deref() == Some("C"))
        .collect();
    assert_eq!(c_frames.len(), 2);
    // Both slices contain foreground; the A/B overlap on slice 2 is
    // clipped back to binary.
    for frame in &c_frames {
        assert!(frame.data.iter().all(|&v| v <= 1));
        assert_eq!(frame.segment_number, Some(3));
    }
    let slice2 = c_frames
        .iter()
        .find(|f| f.ref_sop_uid.as_deref() == Some("1.2.3.2"))
        .unwrap();
    assert_eq!(slice2.data, array![[1, 1]]);
}

/// Re-running the same plan must not duplicate the merged segment.
#[test]
fn merge_stage_is_re_run_safe() {
    let dir = tempfile::tempdir().unwrap();
    let prepared_path = prepare_workspace(dir.path(), &sample_object());
    let plan_path = write_merge_plan(dir.path());

    pipeline::apply_merge_plan(&prepared_path, &plan_path).unwrap();
    let catalog: PreparedCatalog =
        dicom_segvol::catalog::load_json(&prepared_path).unwrap();
    let first_bytes =
        fs::read(&catalog.selected_segmentations["SEG_1"].artifact_file).unwrap();

    pipeline::apply_merge_plan(&prepared_path, &plan_path).unwrap();
    let catalog: PreparedCatalog =
        dicom_segvol::catalog::load_json(&prepared_path).unwrap();
    let record = &catalog.selected_segmentations["SEG_1"];
    assert_eq!(record.num_frames, 5);
    assert_eq!(fs::read(&record.artifact_file).unwrap(), first_bytes);
}

/// A missing artifact skips that object but still rewrites the catalog.
#[test]
fn merge_stage_tolerates_missing_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let prepared_path = prepare_workspace(dir.path(), &sample_object());
    let plan_path = write_merge_plan(dir.path());

    let catalog: PreparedCatalog =
        dicom_segvol::catalog::load_json(&prepared_path).unwrap();
    fs::remove_file(&catalog.selected_segmentations["SEG_1"].artifact_file).unwrap();

    pipeline::apply_merge_plan(&prepared_path, &plan_path).unwrap();
    let after: PreparedCatalog = dicom_segvol::catalog::load_json(&prepared_path).unwrap();
    assert_eq!(after.selected_segmentations["SEG_1"].num_frames, 3);
}

// ---------------------------------------------------------------------------
// Volume stage
// ---------------------------------------------------------------------------

/// An object whose reference series is not in the catalog gets a null
/// `series_info` in the ready catalog and produces no volume files.
#[test]
fn volume_stage_skips_unresolved_series() {
    let dir = tempfile::tempdir().unwrap();
    let prepared_path = prepare_workspace(dir.path(), &sample_object());

    let series_path = dir.path().join("StudySeries_info.json");
    let series = SeriesCatalog(BTreeMap::from([(
        "2".to_string(),
        SeriesRecord {
            series_folder_path: dir.path().join("SCANS/2"),
            series_number: "2".into(),
            series_uid: Some("1.2.840.other".into()),
            series_description: None,
        },
    )]));
    save_json(&series_path, &series).unwrap();

    let out_dir = dir.path().join("NIFTI");
    let ready_path = pipeline::generate_volumes(
        &prepared_path,
        &series_path,
        Some(&out_dir),
        OutputFormat::Nifti,
        false,
    )
    .unwrap();

    let ready: ReadyCatalog = dicom_segvol::catalog::load_json(&ready_path).unwrap();
    assert!(ready.selected_segmentations["SEG_1"].series_info.is_none());
    let outputs: Vec<_> = fs::read_dir(&out_dir).unwrap().collect();
    assert!(outputs.is_empty());
}

/// A resolved series whose folder cannot be loaded is reported and
/// skipped; the batch still completes and the ready catalog carries the
/// matched series record.
#[test]
fn volume_stage_survives_unloadable_series_folders() {
    let dir = tempfile::tempdir().unwrap();
    let prepared_path = prepare_workspace(dir.path(), &sample_object());

    let empty_series_dir = dir.path().join("SCANS/5");
    fs::create_dir_all(&empty_series_dir).unwrap();
    let series_path = dir.path().join("StudySeries_info.json");
    let series = SeriesCatalog(BTreeMap::from([(
        "5".to_string(),
        SeriesRecord {
            series_folder_path: empty_series_dir,
            series_number: "5".into(),
            series_uid: Some("1.2.840.5".into()),
            series_description: Some("CT abdomen".into()),
        },
    )]));
    save_json(&series_path, &series).unwrap();

    let ready_path = pipeline::generate_volumes(
        &prepared_path,
        &series_path,
        None,
        OutputFormat::Nrrd,
        false,
    )
    .unwrap();

    let ready: ReadyCatalog = dicom_segvol::catalog::load_json(&ready_path).unwrap();
    let info = ready.selected_segmentations["SEG_1"]
        .series_info
        .as_ref()
        .unwrap();
    assert_eq!(info.series_number, "5");
}
