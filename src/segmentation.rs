use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One 2D label slice belonging to one segment of a segmentation object.
///
/// Frames are append-only: they are created during decoding, appended by
/// merges and never mutated afterwards. `ref_sop_uid` carries the SOP
/// Instance UID of the image slice this frame overlays; it may be absent
/// when the source file does not reference its slices, in which case the
/// frame cannot be placed into a reconstructed volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub frame_index: usize,
    pub segment_number: Option<u16>,
    pub segment_name: Option<String>,
    /// Recommended display color as a CIELab triple.
    pub segment_color: Option<[u16; 3]>,
    pub image_position: Option<[f64; 3]>,
    pub ref_sop_uid: Option<String>,
    pub data: Array2<u8>,
}

/// A decoded multi-frame DICOM Segmentation object.
///
/// Geometry is stored per object, not per frame: segmentation exports keep
/// spacing and orientation in a shared block that applies to every frame.
/// `rows`/`columns` are constant across all frames of one object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationObject {
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
    pub frames: Vec<Frame>,
}

impl SegmentationObject {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Frame count per distinct segment name. Unnamed frames are not counted.
    pub fn segment_name_count(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for frame in &self.frames {
            if let Some(name) = &frame.segment_name {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Distinct segment names in order of first appearance.
    pub fn distinct_segment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for frame in &self.frames {
            if let Some(name) = &frame.segment_name {
                if !names.iter().any(|n| n == name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    pub fn has_segment_name(&self, name: &str) -> bool {
        self.frames
            .iter()
            .any(|frame| frame.segment_name.as_deref() == Some(name))
    }

    /// Highest segment number present, or 0 when no frame carries one.
    pub fn max_segment_number(&self) -> u16 {
        self.frames
            .iter()
            .filter_map(|frame| frame.segment_number)
            .max()
            .unwrap_or(0)
    }
}

/// Hands out fresh segment numbers for one segmentation object.
///
/// Seeded once from the object's highest existing number and incremented
/// under single-writer discipline, so distinct merge directives in one run
/// receive strictly increasing numbers.
#[derive(Debug)]
pub struct SegmentNumberAllocator {
    next: u16,
}

impl SegmentNumberAllocator {
    pub fn for_object(object: &SegmentationObject) -> Self {
        Self {
            next: object.max_segment_number() + 1,
        }
    }

    pub fn allocate(&mut self) -> u16 {
        let number = self.next;
        self.next += 1;
        number
    }
}
