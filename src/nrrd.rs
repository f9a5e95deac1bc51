//! Minimal NRRD0004 writer for reconstructed volumes.
//!
//! Emits a text header followed by a gzip-compressed sample stream in
//! Fortran order (first axis fastest), matching the `sizes` field. Label
//! volumes additionally carry `Segment<i>_*` key/value fields describing
//! each segment (name, display color, nonzero extent, whether the name was
//! auto-generated), the convention segmentation viewers read from
//! `.seg.nrrd` files.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use ndarray::Array3;
use thiserror::Error;

use crate::volume::Affine;

#[derive(Debug, Error)]
pub enum NrrdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed NRRD header in {0}")]
    MalformedHeader(String),
}

/// Per-segment descriptive header fields for label volumes.
#[derive(Debug, Clone)]
pub struct SegmentField {
    pub name: String,
    pub color: Option<[u16; 3]>,
    /// Inclusive nonzero bounding box `[min0, max0, min1, max1, min2, max2]`.
    pub extent: [usize; 6],
    pub auto_named: bool,
}

/// Write an intensity volume (`short` samples).
pub fn write_short(path: &Path, volume: &Array3<i16>, affine: &Affine) -> Result<(), NrrdError> {
    let mut raw = Vec::with_capacity(volume.len() * 2);
    for value in volume.t().iter() {
        raw.extend_from_slice(&value.to_le_bytes());
    }
    write_file(path, &header("short", volume.dim(), affine, &[]), raw)
}

/// Write a label volume (`unsigned char` samples) with segment fields.
pub fn write_labels(
    path: &Path,
    volume: &Array3<u8>,
    affine: &Affine,
    segments: &[SegmentField],
) -> Result<(), NrrdError> {
    let mut extra = Vec::new();
    for (index, segment) in segments.iter().enumerate() {
        extra.push(format!("Segment{index}_Name:={}", segment.name));
        if let Some([l, a, b]) = segment.color {
            extra.push(format!("Segment{index}_Color:={l} {a} {b}"));
        }
        let e = segment.extent;
        extra.push(format!(
            "Segment{index}_Extent:={} {} {} {} {} {}",
            e[0], e[1], e[2], e[3], e[4], e[5]
        ));
        extra.push(format!(
            "Segment{index}_NameAutoGenerated:={}",
            if segment.auto_named { 1 } else { 0 }
        ));
    }

    let raw: Vec<u8> = volume.t().iter().copied().collect();
    write_file(
        path,
        &header("unsigned char", volume.dim(), affine, &extra),
        raw,
    )
}

fn header(
    sample_type: &str,
    dim: (usize, usize, usize),
    affine: &Affine,
    extra: &[String],
) -> String {
    let direction = |axis: usize| {
        format!(
            "({},{},{})",
            affine[0][axis], affine[1][axis], affine[2][axis]
        )
    };
    let mut lines = vec![
        "NRRD0004".to_string(),
        format!("type: {sample_type}"),
        "dimension: 3".to_string(),
        "space: left-posterior-superior".to_string(),
        format!("sizes: {} {} {}", dim.0, dim.1, dim.2),
        format!(
            "space directions: {} {} {}",
            direction(0),
            direction(1),
            direction(2)
        ),
        "kinds: domain domain domain".to_string(),
        "endian: little".to_string(),
        "encoding: gzip".to_string(),
        format!(
            "space origin: ({},{},{})",
            affine[0][3], affine[1][3], affine[2][3]
        ),
    ];
    lines.extend_from_slice(extra);
    lines.push(String::new());
    lines.join("\n")
}

fn write_file(path: &Path, header: &str, raw: Vec<u8>) -> Result<(), NrrdError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;

    let mut bytes = Vec::with_capacity(header.len() + 1 + compressed.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.push(b'\n');
    bytes.extend_from_slice(&compressed);
    fs::write(path, bytes)?;
    Ok(())
}

/// Read the `sizes` field of an existing NRRD file without touching the
/// payload. `Err` for files that are not NRRD at all or whose header is
/// truncated.
pub fn read_sizes(path: &Path) -> Result<(usize, usize, usize), NrrdError> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let bad = || NrrdError::MalformedHeader(path.display().to_string());

    let mut magic = String::new();
    reader.read_line(&mut magic)?;
    if !magic.starts_with("NRRD") {
        return Err(bad());
    }

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(bad());
        }
        let line = line.trim_end();
        if line.is_empty() {
            // Header ended without a sizes field.
            return Err(bad());
        }
        if let Some(rest) = line.strip_prefix("sizes:") {
            let mut parts = rest.split_whitespace().map(str::parse::<usize>);
            let mut next = || parts.next().and_then(Result::ok);
            return match (next(), next(), next()) {
                (Some(a), Some(b), Some(c)) => Ok((a, b, c)),
                _ => Err(bad()),
            };
        }
    }
}
