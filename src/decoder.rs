use std::collections::BTreeMap;
use std::path::Path;

use dicom::core::Tag;
use dicom::object::{InMemDicomObject, open_file};
use dicom::pixeldata::PixelDecoder;
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array4, s};
use thiserror::Error;
use tracing::warn;

use crate::segmentation::{Frame, SegmentationObject};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("missing required attribute {0}")]
    MissingAttribute(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),
}

/// Decode one multi-frame DICOM Segmentation file into a
/// [`SegmentationObject`].
///
/// Geometry is read once from the shared functional groups block; segment
/// names and colors come from the segment definition sequence; each frame's
/// segment number, source slice identity and in-plane position are resolved
/// through the per-frame functional groups. Every lookup in those chains is
/// optional: absent metadata leaves the corresponding field `None` rather
/// than failing the decode. Only an unreadable file or missing pixel matrix
/// dimensions abort the object.
pub fn decode_segmentation_file(path: &Path) -> Result<SegmentationObject, DecodeError> {
    let object = open_file(path)?;
    let ds: &InMemDicomObject = &object;

    let name =
        string_value(ds, tags::SERIES_DESCRIPTION).unwrap_or_else(|| "Unnamed_Segmentation".into());
    let segmentation_type =
        string_value(ds, tags::SEGMENTATION_TYPE).unwrap_or_else(|| "UNKNOWN".into());
    let ref_series_uid = first_item(ds, tags::REFERENCED_SERIES_SEQUENCE)
        .and_then(|item| string_value(item, tags::SERIES_INSTANCE_UID));
    let ref_sop_class_uid = string_value(ds, tags::REFERENCED_SOP_CLASS_UID);

    let rows = u16_value(ds, tags::ROWS).ok_or(DecodeError::MissingAttribute("Rows"))?;
    let columns = u16_value(ds, tags::COLUMNS).ok_or(DecodeError::MissingAttribute("Columns"))?;

    let shared = first_item(ds, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE);
    let pixel_measures = shared.and_then(|item| first_item(item, tags::PIXEL_MEASURES_SEQUENCE));
    let pixel_spacing = pixel_measures.and_then(|pm| float_pair(pm, tags::PIXEL_SPACING));
    let slice_thickness = pixel_measures.and_then(|pm| float_value(pm, tags::SLICE_THICKNESS));
    let spacing_between_slices =
        pixel_measures.and_then(|pm| float_value(pm, tags::SPACING_BETWEEN_SLICES));
    let image_orientation = shared
        .and_then(|item| first_item(item, tags::PLANE_ORIENTATION_SEQUENCE))
        .and_then(|po| float_six(po, tags::IMAGE_ORIENTATION_PATIENT));

    let segments = segment_catalog(ds);

    let decoded = object.decode_pixel_data()?;
    let stack = decoded.to_ndarray::<u8>()?;
    let depth = stack.shape()[0];

    let declared_frames = u32_value(ds, tags::NUMBER_OF_FRAMES).map(|n| n as usize);
    let per_frame = ds
        .element(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
        .ok()
        .and_then(|element| element.items());

    let frames = match (declared_frames, per_frame) {
        (Some(count), Some(items)) if items.len() == count => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                decode_frame(index, item, &segments, &stack, rows as usize, columns as usize)
            })
            .collect(),
        _ => {
            // Per-frame metadata missing or inconsistent with the declared
            // frame count: fall back to index-only frames carrying just the
            // label data.
            warn!(
                path = %path.display(),
                declared = ?declared_frames,
                actual = depth,
                "per-frame metadata unusable, emitting index-only frames"
            );
            (0..depth)
                .map(|index| Frame {
                    frame_index: index,
                    segment_number: None,
                    segment_name: None,
                    segment_color: None,
                    image_position: None,
                    ref_sop_uid: None,
                    data: stack.slice(s![index, .., .., 0]).to_owned(),
                })
                .collect()
        }
    };

    Ok(SegmentationObject {
        name,
        segmentation_type,
        ref_series_uid,
        ref_sop_class_uid,
        pixel_spacing,
        slice_thickness,
        spacing_between_slices,
        image_orientation,
        rows,
        columns,
        frames,
    })
}

struct SegmentDescriptor {
    name: String,
    color: Option<[u16; 3]>,
}

/// Segment number -> (label, color) from the segment definition sequence.
/// Segments without an explicit label get the generated name `Label_<n>`.
fn segment_catalog(ds: &InMemDicomObject) -> BTreeMap<u16, SegmentDescriptor> {
    let mut catalog = BTreeMap::new();
    let Some(items) = ds.element(tags::SEGMENT_SEQUENCE).ok().and_then(|e| e.items()) else {
        return catalog;
    };
    for item in items {
        let Some(number) = u16_value(item, tags::SEGMENT_NUMBER) else {
            continue;
        };
        let name = string_value(item, tags::SEGMENT_LABEL)
            .unwrap_or_else(|| format!("Label_{number}"));
        let color = color_value(item, tags::RECOMMENDED_DISPLAY_CIE_LAB_VALUE);
        catalog.insert(number, SegmentDescriptor { name, color });
    }
    catalog
}

fn decode_frame(
    index: usize,
    item: &InMemDicomObject,
    segments: &BTreeMap<u16, SegmentDescriptor>,
    stack: &Array4<u8>,
    rows: usize,
    columns: usize,
) -> Frame {
    let segment_number = first_item(item, tags::SEGMENT_IDENTIFICATION_SEQUENCE)
        .and_then(|si| u16_value(si, tags::REFERENCED_SEGMENT_NUMBER));
    let descriptor = segment_number.and_then(|number| segments.get(&number));

    let ref_sop_uid = first_item(item, tags::DERIVATION_IMAGE_SEQUENCE)
        .and_then(|derivation| first_item(derivation, tags::SOURCE_IMAGE_SEQUENCE))
        .and_then(|source| string_value(source, tags::REFERENCED_SOP_INSTANCE_UID));

    let image_position = first_item(item, tags::PLANE_POSITION_SEQUENCE)
        .and_then(|pp| float_triple(pp, tags::IMAGE_POSITION_PATIENT));

    // A declared frame beyond the decoded pixel depth yields an empty mask.
    let data = if index < stack.shape()[0] {
        stack.slice(s![index, .., .., 0]).to_owned()
    } else {
        Array2::zeros((rows, columns))
    };

    Frame {
        frame_index: index,
        segment_number,
        segment_name: descriptor.map(|d| d.name.clone()),
        segment_color: descriptor.and_then(|d| d.color),
        image_position,
        ref_sop_uid,
        data,
    }
}

fn first_item(obj: &InMemDicomObject, tag: Tag) -> Option<&InMemDicomObject> {
    obj.element(tag).ok()
        .and_then(|element| element.items())
        .and_then(|items| items.first())
}

pub(crate) fn string_value(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag).ok()
        .and_then(|element| element.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn u16_value(obj: &InMemDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|element| element.to_int::<u16>().ok())
}

fn u32_value(obj: &InMemDicomObject, tag: Tag) -> Option<u32> {
    obj.element(tag).ok().and_then(|element| element.to_int::<u32>().ok())
}

pub(crate) fn float_value(obj: &InMemDicomObject, tag: Tag) -> Option<f64> {
    obj.element(tag).ok().and_then(|element| element.to_float64().ok())
}

pub(crate) fn float_pair(obj: &InMemDicomObject, tag: Tag) -> Option<[f64; 2]> {
    let values = obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())?;
    (values.len() >= 2).then(|| [values[0], values[1]])
}

pub(crate) fn float_triple(obj: &InMemDicomObject, tag: Tag) -> Option<[f64; 3]> {
    let values = obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())?;
    (values.len() >= 3).then(|| [values[0], values[1], values[2]])
}

pub(crate) fn float_six(obj: &InMemDicomObject, tag: Tag) -> Option<[f64; 6]> {
    let values = obj.element(tag).ok().and_then(|e| e.to_multi_float64().ok())?;
    (values.len() >= 6).then(|| {
        [
            values[0], values[1], values[2], values[3], values[4], values[5],
        ]
    })
}

fn color_value(obj: &InMemDicomObject, tag: Tag) -> Option<[u16; 3]> {
    let values = obj.element(tag).ok().and_then(|e| e.to_multi_int::<u16>().ok())?;
    (values.len() >= 3).then(|| [values[0], values[1], values[2]])
}
