//! # DICOM-segvol library
//!
//! This crate decodes multi-frame DICOM Segmentation objects and
//! reconstructs analysis-ready 3D label volumes aligned to their reference
//! CT/MRI series.
//!
//! It is built on the dicom-rs ecosystem and follows a batch pipeline:
//! segmentation files are decoded into frame-indexed, segment-labeled
//! objects; semantically related segments can be merged into new named
//! objects via per-slice union; each object's declared source series is
//! resolved against a series catalog; and per-segment mask volumes are
//! placed into the reference grid by exact SOP-instance identity (never by
//! position). Volumes are written as NIfTI or NRRD together with the
//! voxel-to-patient affine.
//!
//! Frames are append-only: merges add new frames under fresh segment
//! numbers and never modify existing ones, and re-applying a merge plan is
//! a no-op, so interrupted batch runs can simply be re-run. Volume outputs
//! are likewise skipped when a correctly-shaped file already exists.
//!
//! # Examples
//!
//! ## Decoding a segmentation and reconstructing its label volumes
//!
//! ```no_run
//! # use std::path::Path;
//! # use dicom_segvol::{decoder, reconstruct};
//! let object = decoder::decode_segmentation_file(Path::new("seg/assessor.dcm"))
//!     .expect("should have decoded the segmentation file");
//! let series = reconstruct::load_series(Path::new("scans/2/DICOM"))
//!     .expect("should have loaded the reference series");
//! for label in reconstruct::build_label_volumes(&object, &series) {
//!     println!("{}: {} frames placed", label.segment_name, label.placed_frames);
//! }
//! ```

pub mod artifact;
pub mod catalog;
pub mod decoder;
pub mod enums;
pub mod merge;
pub mod nrrd;
pub mod pipeline;
pub mod reconstruct;
pub mod resolver;
pub mod segmentation;
pub mod volume;
pub mod writer;
