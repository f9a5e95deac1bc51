//! Intermediate per-object artifacts.
//!
//! The full decoded (and possibly merged) [`SegmentationObject`] is stored
//! as gzip-compressed JSON, bulk label arrays included, so later pipeline
//! steps can reuse it without re-reading the DICOM export. A companion
//! sidecar JSON mirrors the same structure with the 2D arrays stripped for
//! lightweight inspection.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segmentation::SegmentationObject;

pub const ARTIFACT_SUFFIX: &str = ".seg.json.gz";
pub const SIDECAR_SUFFIX: &str = "_withoutImageData.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File stem for one object's artifact pair:
/// `EN_<exported_name>_SN_<segmentor_name>_FN_<object_key>`, spaces
/// replaced with underscores.
pub fn artifact_stem(exported_name: &str, segmentor_name: &str, object_key: &str) -> String {
    format!(
        "EN_{}_SN_{}_FN_{}",
        exported_name.replace(' ', "_"),
        segmentor_name.replace(' ', "_"),
        object_key.replace(' ', "_"),
    )
}

/// Write the full artifact. The object is serialized and compressed in
/// memory first so the destination file is created in a single write.
pub fn write_artifact(path: &Path, object: &SegmentationObject) -> Result<(), ArtifactError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, object)?;
    let bytes = encoder.finish()?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<SegmentationObject, ArtifactError> {
    let bytes = fs::read(path)?;
    let decoder = GzDecoder::new(bytes.as_slice());
    Ok(serde_json::from_reader(decoder)?)
}

/// Write the sidecar: identical structure, no pixel data.
pub fn write_sidecar(path: &Path, object: &SegmentationObject) -> Result<(), ArtifactError> {
    let sidecar = Sidecar::from(object);
    let mut bytes = serde_json::to_vec_pretty(&sidecar)?;
    bytes.push(b'\n');
    fs::write(path, bytes)?;
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Sidecar {
    pub name: String,
    pub segmentation_type: String,
    pub ref_series_uid: Option<String>,
    pub ref_sop_class_uid: Option<String>,
    pub pixel_spacing: Option<[f64; 2]>,
    pub slice_thickness: Option<f64>,
    pub spacing_between_slices: Option<f64>,
    pub image_orientation: Option<[f64; 6]>,
    pub rows: u16,
    pub columns: u16,
    pub num_frames: usize,
    pub frames: Vec<SidecarFrame>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SidecarFrame {
    pub frame_index: usize,
    pub segment_number: Option<u16>,
    pub segment_name: Option<String>,
    pub segment_color: Option<[u16; 3]>,
    pub image_position: Option<[f64; 3]>,
    pub ref_sop_uid: Option<String>,
}

impl From<&SegmentationObject> for Sidecar {
    fn from(object: &SegmentationObject) -> Self {
        Sidecar {
            name: object.name.clone(),
            segmentation_type: object.segmentation_type.clone(),
            ref_series_uid: object.ref_series_uid.clone(),
            ref_sop_class_uid: object.ref_sop_class_uid.clone(),
            pixel_spacing: object.pixel_spacing,
            slice_thickness: object.slice_thickness,
            spacing_between_slices: object.spacing_between_slices,
            image_orientation: object.image_orientation,
            rows: object.rows,
            columns: object.columns,
            num_frames: object.frames.len(),
            frames: object
                .frames
                .iter()
                .map(|frame| SidecarFrame {
                    frame_index: frame.frame_index,
                    segment_number: frame.segment_number,
                    segment_name: frame.segment_name.clone(),
                    segment_color: frame.segment_color,
                    image_position: frame.image_position,
                    ref_sop_uid: frame.ref_sop_uid.clone(),
                })
                .collect(),
        }
    }
}

/// Artifact + sidecar paths for one object inside `out_dir`.
pub fn artifact_paths(out_dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
    (
        out_dir.join(format!("{stem}{ARTIFACT_SUFFIX}")),
        out_dir.join(format!("{stem}{SIDECAR_SUFFIX}")),
    )
}
