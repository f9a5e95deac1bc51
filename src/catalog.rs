//! Catalog records exchanged between pipeline stages.
//!
//! Each stage consumes one record shape and produces the next: a series
//! catalog and a selection catalog come in from the study-parsing and
//! selection collaborators, decoding upgrades selections to prepared
//! records, and volume generation upgrades prepared records to ready
//! records with the resolved series attached. The JSON field names match
//! the catalog files produced by those collaborators.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One image series known to the study export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub series_folder_path: PathBuf,
    pub series_number: String,
    pub series_uid: Option<String>,
    pub series_description: Option<String>,
}

/// Series catalog keyed by series folder name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesCatalog(pub BTreeMap<String, SeriesRecord>);

/// A segmentation object picked for processing by the selection
/// collaborator. The assessor folder is expected to contain a single
/// segmentation `.dcm` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedSegmentation {
    pub assessor_folder_path: PathBuf,
    pub exported_name: Option<String>,
    pub segmentor_name: Option<String>,
}

impl SelectedSegmentation {
    pub fn exported_name(&self) -> &str {
        self.exported_name.as_deref().unwrap_or("UnknownExportName")
    }

    pub fn segmentor_name(&self) -> &str {
        self.segmentor_name.as_deref().unwrap_or("UnknownSegmentor")
    }
}

/// A selection upgraded by the decode stage: artifact locations plus the
/// summary fields downstream steps key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedSegmentation {
    #[serde(flatten)]
    pub selection: SelectedSegmentation,
    pub artifact_file: PathBuf,
    pub sidecar_file: PathBuf,
    pub num_frames: usize,
    pub segment_name_count: BTreeMap<String, usize>,
    /// Referenced series UID as actually read from the segmentation file.
    pub ref_series_uid: Option<String>,
}

/// A prepared record upgraded by series resolution; `series_info` is `None`
/// when no catalog entry matches the referenced series UID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadySegmentation {
    #[serde(flatten)]
    pub prepared: PreparedSegmentation,
    pub series_info: Option<SeriesRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCatalog {
    #[serde(default)]
    pub selected_segmentations: BTreeMap<String, SelectedSegmentation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedCatalog {
    #[serde(default)]
    pub selected_segmentations: BTreeMap<String, PreparedSegmentation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyCatalog {
    #[serde(default)]
    pub selected_segmentations: BTreeMap<String, ReadySegmentation>,
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let file = File::open(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CatalogError> {
    let file = File::create(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|source| {
        CatalogError::Json {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_catalog_parses_collaborator_json() {
        let raw = r#"{
            "selected_segmentations": {
                "SEG_20241021_181708_943_S2": {
                    "assessor_folder_path": "/data/2072/ASSESSORS/SEG_20241021_181708_943_S2",
                    "exported_name": "Final Export",
                    "segmentor_name": "Reader 1"
                }
            }
        }"#;
        let catalog: SelectionCatalog = serde_json::from_str(raw).unwrap();
        let selected = &catalog.selected_segmentations["SEG_20241021_181708_943_S2"];
        assert_eq!(selected.exported_name(), "Final Export");
        assert_eq!(selected.segmentor_name(), "Reader 1");
    }

    #[test]
    fn missing_selection_names_fall_back_to_placeholders() {
        let raw = r#"{"assessor_folder_path": "/data/x"}"#;
        let selected: SelectedSegmentation = serde_json::from_str(raw).unwrap();
        assert_eq!(selected.exported_name(), "UnknownExportName");
        assert_eq!(selected.segmentor_name(), "UnknownSegmentor");
    }

    #[test]
    fn prepared_record_serializes_flat() {
        let prepared = PreparedSegmentation {
            selection: SelectedSegmentation {
                assessor_folder_path: "/data/a".into(),
                exported_name: Some("E".into()),
                segmentor_name: Some("S".into()),
            },
            artifact_file: "/out/a.seg.json.gz".into(),
            sidecar_file: "/out/a_withoutImageData.json".into(),
            num_frames: 12,
            segment_name_count: BTreeMap::from([("Pancreas".to_string(), 12)]),
            ref_series_uid: Some("1.2.3".into()),
        };
        let value = serde_json::to_value(&prepared).unwrap();
        assert_eq!(value["assessor_folder_path"], "/data/a");
        assert_eq!(value["num_frames"], 12);
        assert_eq!(value["segment_name_count"]["Pancreas"], 12);
    }
}
