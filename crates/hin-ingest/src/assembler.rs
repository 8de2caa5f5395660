//! Record assembler
//!
//! Concatenates normalized pages into one ordered collection per service.

use crate::error::{IngestError, Result};
use crate::normalizer::{FeatureRecord, NormalizedPage};
use hin_common::Crs;

/// Every record fetched for one service, in source order
#[derive(Debug, Clone)]
pub struct IngestedCollection {
    pub records: Vec<FeatureRecord>,
    /// True when at least one page was normalized with geometry
    pub has_geometry_column: bool,
    pub crs: Crs,
    pub pages_loaded: u64,
    pub pages_skipped: u64,
}

impl IngestedCollection {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub struct RecordAssembler {
    crs: Crs,
    records: Vec<FeatureRecord>,
    has_geometry_column: bool,
    pages_loaded: u64,
    pages_skipped: u64,
    last_offset: Option<u64>,
}

impl RecordAssembler {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            records: Vec::new(),
            has_geometry_column: false,
            pages_loaded: 0,
            pages_skipped: 0,
            last_offset: None,
        }
    }

    /// Append a page. Pages must arrive in ascending offset order and carry
    /// the collection's CRS.
    pub fn push_page(&mut self, page: NormalizedPage) -> Result<()> {
        if page.crs != self.crs {
            return Err(IngestError::Geometry(format!(
                "page at offset {} is in {}, collection is in {}",
                page.offset, page.crs, self.crs
            )));
        }
        if self.last_offset.is_some_and(|last| page.offset <= last) {
            return Err(IngestError::MalformedPayload(format!(
                "page at offset {} arrived out of order",
                page.offset
            )));
        }

        self.has_geometry_column |= page.geometry_bearing();
        self.last_offset = Some(page.offset);
        self.pages_loaded += 1;
        self.records.extend(page.records);
        Ok(())
    }

    /// Record a page that produced nothing
    pub fn skip_page(&mut self) {
        self.pages_skipped += 1;
    }

    pub fn finish(self) -> IngestedCollection {
        IngestedCollection {
            records: self.records,
            has_geometry_column: self.has_geometry_column,
            crs: self.crs,
            pages_loaded: self.pages_loaded,
            pages_skipped: self.pages_skipped,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalizer::Strategy;
    use serde_json::{json, Map};

    fn record(seq: i64) -> FeatureRecord {
        let mut attributes = Map::new();
        attributes.insert("seq".to_string(), json!(seq));
        FeatureRecord::attributes_only(attributes)
    }

    fn page(offset: u64, seqs: std::ops::Range<i64>, strategy: Strategy) -> NormalizedPage {
        NormalizedPage {
            offset,
            records: seqs.map(record).collect(),
            strategy,
            crs: Crs::EPSG_26918,
        }
    }

    #[test]
    fn test_pages_concatenate_in_order() {
        let mut assembler = RecordAssembler::new(Crs::EPSG_26918);
        assembler.push_page(page(0, 0..3, Strategy::GeoJsonAttributes)).unwrap();
        assembler.skip_page();
        assembler.push_page(page(4000, 3..5, Strategy::GeoJsonBulk)).unwrap();

        let collection = assembler.finish();
        let seqs: Vec<i64> = collection
            .records
            .iter()
            .map(|r| r.attributes["seq"].as_i64().unwrap())
            .collect();

        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(collection.has_geometry_column);
        assert_eq!(collection.pages_loaded, 2);
        assert_eq!(collection.pages_skipped, 1);
    }

    #[test]
    fn test_attribute_only_pages_leave_no_geometry_column() {
        let mut assembler = RecordAssembler::new(Crs::EPSG_26918);
        assembler.push_page(page(0, 0..2, Strategy::EsriAttributes)).unwrap();
        assert!(!assembler.finish().has_geometry_column);
    }

    #[test]
    fn test_empty_collection() {
        let collection = RecordAssembler::new(Crs::EPSG_26918).finish();
        assert!(collection.is_empty());
        assert_eq!(collection.len(), 0);
    }

    #[test]
    fn test_rejects_mismatched_crs_and_order() {
        let mut assembler = RecordAssembler::new(Crs::EPSG_4326);
        assert!(assembler.push_page(page(0, 0..1, Strategy::GeoJsonBulk)).is_err());

        let mut assembler = RecordAssembler::new(Crs::EPSG_26918);
        assembler.push_page(page(2000, 0..1, Strategy::GeoJsonBulk)).unwrap();
        assert!(assembler.push_page(page(0, 1..2, Strategy::GeoJsonBulk)).is_err());
    }
}
