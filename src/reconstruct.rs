use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom::object::{InMemDicomObject, open_file};
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::decoder::{float_pair, float_six, float_triple, float_value, string_value};
use crate::segmentation::SegmentationObject;
use crate::volume::{AXIAL_ORIENTATION, Affine, build_affine};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A reference image series loaded into memory: the stacked intensity
/// volume, its affine, and the per-slice instance identity established by
/// the canonical sort order.
pub struct LoadedSeries {
    /// SOP Instance UIDs in canonical slice order; `None` for slices that
    /// did not carry one (they occupy an index but can never be matched).
    pub sop_uids: Vec<Option<String>>,
    /// `(rows, cols, n_slices)`.
    pub shape: (usize, usize, usize),
    pub affine: Affine,
    pub volume: Array3<i16>,
    sop_index: HashMap<String, usize>,
}

impl LoadedSeries {
    pub fn new(sop_uids: Vec<Option<String>>, volume: Array3<i16>, affine: Affine) -> Self {
        let shape = volume.dim();
        let mut sop_index = HashMap::new();
        for (index, uid) in sop_uids.iter().enumerate() {
            if let Some(uid) = uid {
                sop_index.entry(uid.clone()).or_insert(index);
            }
        }
        Self {
            sop_uids,
            shape,
            affine,
            volume,
            sop_index,
        }
    }

    /// Canonical slice index for an instance identifier, if the series
    /// contains that exact slice. No positional fallback.
    pub fn slice_index(&self, sop_uid: &str) -> Option<usize> {
        self.sop_index.get(sop_uid).copied()
    }
}

struct SliceRecord {
    instance_number: i64,
    sop_uid: Option<String>,
    position: Option<[f64; 3]>,
    orientation: Option<[f64; 6]>,
    pixel_spacing: Option<[f64; 2]>,
    slice_thickness: Option<f64>,
    data: Array2<i16>,
}

/// Load every `.dcm` slice of a series folder into a [`LoadedSeries`].
///
/// Slices are decoded in parallel, then sorted by instance number with the
/// SOP Instance UID as a deterministic tie-break (enumeration order is
/// filesystem-dependent and never relied upon). Unreadable files are
/// skipped with a warning; a folder yielding no decodable slices or slices
/// of differing in-plane dimensions is an error.
pub fn load_series(folder: &Path) -> Result<LoadedSeries, ReconstructError> {
    let paths: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
        })
        .collect();

    if paths.is_empty() {
        return Err(ReconstructError::NoValidImages);
    }

    let mut slices: Vec<SliceRecord> = paths.par_iter().filter_map(|path| read_slice(path)).collect();
    if slices.is_empty() {
        return Err(ReconstructError::NoValidImages);
    }

    sort_slices(&mut slices);

    let first_dim = slices[0].data.dim();
    if slices.iter().any(|slice| slice.data.dim() != first_dim) {
        return Err(ReconstructError::InconsistentDimensions);
    }

    let (rows, columns) = first_dim;
    let mut volume = Array3::<i16>::zeros((rows, columns, slices.len()));
    for (index, slice) in slices.iter().enumerate() {
        volume.slice_mut(s![.., .., index]).assign(&slice.data);
    }

    let first = &slices[0];
    let affine = build_affine(
        first.orientation.unwrap_or(AXIAL_ORIENTATION),
        first.pixel_spacing.unwrap_or([1.0, 1.0]),
        first.slice_thickness.unwrap_or(1.0),
        first.position.unwrap_or([0.0; 3]),
    );

    let sop_uids = slices.into_iter().map(|slice| slice.sop_uid).collect();
    Ok(LoadedSeries::new(sop_uids, volume, affine))
}

fn read_slice(path: &Path) -> Option<SliceRecord> {
    let object = match open_file(path) {
        Ok(object) => object,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping unreadable slice");
            return None;
        }
    };
    let data = object
        .decode_pixel_data()
        .and_then(|decoded| decoded.to_ndarray::<i16>())
        .map(|array| array.slice_move(s![0, .., .., 0]));
    let data = match data {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "skipping undecodable pixel data");
            return None;
        }
    };

    let ds: &InMemDicomObject = &object;
    Some(SliceRecord {
        instance_number: ds
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|element| element.to_int::<i64>().ok())
            .unwrap_or(0),
        sop_uid: string_value(ds, tags::SOP_INSTANCE_UID),
        position: float_triple(ds, tags::IMAGE_POSITION_PATIENT),
        orientation: float_six(ds, tags::IMAGE_ORIENTATION_PATIENT),
        pixel_spacing: float_pair(ds, tags::PIXEL_SPACING),
        slice_thickness: float_value(ds, tags::SLICE_THICKNESS),
        data,
    })
}

fn sort_slices(slices: &mut [SliceRecord]) {
    slices.sort_by(|a, b| {
        a.instance_number
            .cmp(&b.instance_number)
            .then_with(|| a.sop_uid.cmp(&b.sop_uid))
    });
}

/// Caches loaded series by series UID so that repeated label-volume
/// construction against the same reference series does not re-scan disk.
#[derive(Default)]
pub struct SeriesCache {
    loaded: HashMap<String, Arc<LoadedSeries>>,
}

impl SeriesCache {
    pub fn get_or_load(
        &mut self,
        series_uid: &str,
        folder: &Path,
    ) -> Result<Arc<LoadedSeries>, ReconstructError> {
        if let Some(series) = self.loaded.get(series_uid) {
            return Ok(Arc::clone(series));
        }
        let series = Arc::new(load_series(folder)?);
        self.loaded.insert(series_uid.to_string(), Arc::clone(&series));
        Ok(series)
    }
}

/// One per-segment mask volume aligned to its reference series.
pub struct LabelVolume {
    pub segment_name: String,
    pub data: Array3<u8>,
    pub affine: Affine,
    pub placed_frames: usize,
    pub dropped_frames: usize,
}

/// Build one mask volume per distinct segment name of the object.
///
/// Each frame is placed at the slice index whose SOP Instance UID equals
/// the frame's slice identity exactly. Frames with an absent or unmatched
/// identity are dropped and counted; frames whose 2D shape disagrees with
/// the reference in-plane dimensions are skipped with a warning, never
/// resized. Every returned volume shares the reference series' affine.
pub fn build_label_volumes(
    object: &SegmentationObject,
    series: &LoadedSeries,
) -> Vec<LabelVolume> {
    let (rows, columns, _) = series.shape;
    let mut volumes = Vec::new();

    for name in object.distinct_segment_names() {
        let mut mask = Array3::<u8>::zeros(series.shape);
        let mut placed = 0;
        let mut dropped = 0;

        for frame in object
            .frames
            .iter()
            .filter(|frame| frame.segment_name.as_deref() == Some(name.as_str()))
        {
            let index = frame
                .ref_sop_uid
                .as_deref()
                .and_then(|uid| series.slice_index(uid));
            let Some(index) = index else {
                dropped += 1;
                continue;
            };
            if frame.data.dim() != (rows, columns) {
                warn!(
                    segment = %name,
                    frame_index = frame.frame_index,
                    frame_dim = ?frame.data.dim(),
                    series_dim = ?(rows, columns),
                    "frame shape disagrees with reference series, skipping placement"
                );
                dropped += 1;
                continue;
            }
            mask.slice_mut(s![.., .., index]).assign(&frame.data);
            placed += 1;
        }

        if dropped > 0 {
            warn!(segment = %name, placed, dropped, "dropped frames during volume placement");
        }
        volumes.push(LabelVolume {
            segment_name: name,
            data: mask,
            affine: series.affine,
            placed_frames: placed,
            dropped_frames: dropped,
        });
    }
    volumes
}
