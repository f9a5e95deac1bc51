//! Container output for reconstructed volumes.
//!
//! NIfTI files carry only the array and its affine (sform rows); NRRD files
//! additionally carry the per-segment header fields. Existing destination
//! files with the expected shape are left untouched unless regeneration is
//! forced, so interrupted batch runs can be resumed by re-running them.

use std::path::Path;

use ndarray::Array3;
use nifti::{NiftiHeader, writer::WriterOptions};
use thiserror::Error;
use tracing::{debug, info};

use crate::enums::OutputFormat;
use crate::nrrd::{self, NrrdError, SegmentField};
use crate::volume::Affine;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("NRRD error: {0}")]
    Nrrd(#[from] NrrdError),
}

/// Write one intensity volume.
pub fn write_intensity_volume(
    path: &Path,
    volume: &Array3<i16>,
    affine: &Affine,
    format: OutputFormat,
) -> Result<(), WriteError> {
    match format {
        OutputFormat::Nifti => {
            WriterOptions::new(path)
                .reference_header(&nifti_header(affine))
                .write_nifti(volume)?;
        }
        OutputFormat::Nrrd => nrrd::write_short(path, volume, affine)?,
    }
    info!(path = %path.display(), shape = ?volume.dim(), "wrote intensity volume");
    Ok(())
}

/// Write one label volume. Segment fields only land in NRRD headers; the
/// NIfTI form stores array and affine alone.
pub fn write_label_volume(
    path: &Path,
    volume: &Array3<u8>,
    affine: &Affine,
    segments: &[SegmentField],
    format: OutputFormat,
) -> Result<(), WriteError> {
    match format {
        OutputFormat::Nifti => {
            WriterOptions::new(path)
                .reference_header(&nifti_header(affine))
                .write_nifti(volume)?;
        }
        OutputFormat::Nrrd => nrrd::write_labels(path, volume, affine, segments)?,
    }
    info!(path = %path.display(), shape = ?volume.dim(), "wrote label volume");
    Ok(())
}

/// Whether an existing destination can be kept as-is.
///
/// True only when the file exists, parses, and matches the expected shape;
/// absent, unreadable or wrong-shaped files force regeneration. `overwrite`
/// disables skipping entirely.
pub fn can_skip(
    path: &Path,
    expected_shape: (usize, usize, usize),
    format: OutputFormat,
    overwrite: bool,
) -> bool {
    if overwrite || !path.exists() {
        return false;
    }
    match existing_shape(path, format) {
        Some(shape) if shape == expected_shape => {
            info!(path = %path.display(), ?shape, "output exists with expected shape, skipping");
            true
        }
        Some(shape) => {
            debug!(path = %path.display(), ?shape, ?expected_shape, "shape mismatch, regenerating");
            false
        }
        None => {
            debug!(path = %path.display(), "existing output unreadable, regenerating");
            false
        }
    }
}

fn existing_shape(path: &Path, format: OutputFormat) -> Option<(usize, usize, usize)> {
    match format {
        OutputFormat::Nifti => {
            let header = NiftiHeader::from_file(path).ok()?;
            (header.dim[0] >= 3).then(|| {
                (
                    header.dim[1] as usize,
                    header.dim[2] as usize,
                    header.dim[3] as usize,
                )
            })
        }
        OutputFormat::Nrrd => nrrd::read_sizes(path).ok(),
    }
}

/// NIfTI header carrying the affine in the sform rows. Voxel sizes in
/// `pixdim` are the column norms of the linear part.
fn nifti_header(affine: &Affine) -> NiftiHeader {
    let mut header = NiftiHeader::default();
    let norm = |axis: usize| {
        (affine[0][axis].powi(2) + affine[1][axis].powi(2) + affine[2][axis].powi(2)).sqrt() as f32
    };
    header.pixdim = [1.0, norm(0), norm(1), norm(2), 1.0, 1.0, 1.0, 1.0];
    header.sform_code = 1;
    header.srow_x = [
        affine[0][0] as f32,
        affine[0][1] as f32,
        affine[0][2] as f32,
        affine[0][3] as f32,
    ];
    header.srow_y = [
        affine[1][0] as f32,
        affine[1][1] as f32,
        affine[1][2] as f32,
        affine[1][3] as f32,
    ];
    header.srow_z = [
        affine[2][0] as f32,
        affine[2][1] as f32,
        affine[2][2] as f32,
        affine[2][3] as f32,
    ];
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{AXIAL_ORIENTATION, build_affine};
    use ndarray::Array3;
    use std::fs;

    fn affine() -> Affine {
        build_affine(AXIAL_ORIENTATION, [0.7, 0.7], 2.5, [-100.0, -80.0, 40.0])
    }

    #[test]
    fn nifti_header_embeds_affine_in_sform() {
        let header = nifti_header(&affine());
        assert_eq!(header.sform_code, 1);
        assert_eq!(header.srow_x, [0.7, 0.0, 0.0, -100.0]);
        assert_eq!(header.srow_y, [0.0, 0.7, 0.0, -80.0]);
        assert_eq!(header.srow_z, [0.0, 0.0, 2.5, 40.0]);
        assert!((header.pixdim[1] - 0.7).abs() < 1e-6);
        assert!((header.pixdim[3] - 2.5).abs() < 1e-6);
    }

    #[test]
    fn skip_requires_existing_file_with_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.nrrd");
        let volume = Array3::<i16>::zeros((4, 4, 3));
        write_intensity_volume(&path, &volume, &affine(), OutputFormat::Nrrd).unwrap();

        assert!(can_skip(&path, (4, 4, 3), OutputFormat::Nrrd, false));
        assert!(!can_skip(&path, (4, 4, 9), OutputFormat::Nrrd, false));
        assert!(!can_skip(&path, (4, 4, 3), OutputFormat::Nrrd, true));
        assert!(!can_skip(
            &dir.path().join("absent.nrrd"),
            (4, 4, 3),
            OutputFormat::Nrrd,
            false
        ));
    }

    #[test]
    fn skipped_outputs_keep_their_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.nrrd");
        let volume = Array3::<i16>::zeros((2, 2, 2));
        write_intensity_volume(&path, &volume, &affine(), OutputFormat::Nrrd).unwrap();
        let before = fs::read(&path).unwrap();

        // The idempotent re-run path: shape matches, so nothing is written.
        assert!(can_skip(&path, volume.dim(), OutputFormat::Nrrd, false));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn unreadable_existing_output_forces_regeneration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2.nrrd");
        fs::write(&path, b"garbage").unwrap();
        assert!(!can_skip(&path, (2, 2, 2), OutputFormat::Nrrd, false));
    }
}
