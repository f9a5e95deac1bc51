use tracing::warn;

use crate::catalog::{SeriesCatalog, SeriesRecord};

/// Match a segmentation's declared source series identity against the
/// series catalog.
///
/// Exact string equality on the series UID; the first match in catalog
/// order wins if duplicates exist (duplicates indicate upstream data
/// inconsistency and are not validated here). `None` when the segmentation
/// carries no reference or nothing matches.
pub fn resolve_reference_series<'a>(
    ref_series_uid: Option<&str>,
    catalog: &'a SeriesCatalog,
) -> Option<&'a SeriesRecord> {
    let uid = ref_series_uid?;
    let matched = catalog
        .0
        .values()
        .find(|record| record.series_uid.as_deref() == Some(uid));
    if matched.is_none() {
        warn!(ref_series_uid = uid, "no matching reference series in catalog");
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(number: &str, uid: &str) -> SeriesRecord {
        SeriesRecord {
            series_folder_path: format!("/data/SCANS/{number}").into(),
            series_number: number.to_string(),
            series_uid: Some(uid.to_string()),
            series_description: None,
        }
    }

    #[test]
    fn resolves_by_exact_uid_match() {
        let catalog = SeriesCatalog(BTreeMap::from([
            ("2".to_string(), record("2", "1.2.840.1")),
            ("3".to_string(), record("3", "1.2.840.2")),
        ]));
        let matched = resolve_reference_series(Some("1.2.840.2"), &catalog).unwrap();
        assert_eq!(matched.series_number, "3");
    }

    #[test]
    fn unmatched_or_absent_uid_resolves_to_none() {
        let catalog = SeriesCatalog(BTreeMap::from([("2".to_string(), record("2", "1.2.840.1"))]));
        assert!(resolve_reference_series(Some("9.9.9"), &catalog).is_none());
        assert!(resolve_reference_series(None, &catalog).is_none());
    }

    #[test]
    fn no_partial_uid_matching() {
        let catalog = SeriesCatalog(BTreeMap::from([("2".to_string(), record("2", "1.2.840.1"))]));
        assert!(resolve_reference_series(Some("1.2.840"), &catalog).is_none());
    }
}
