//! Typed records in a JSON file.
//!
//! A record file is a JSON object whose keys are type tags, so each kind of
//! record appears at most once and reads back as the type that wrote it.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::features::FeatureSet;
use crate::params::FeatureParameters;
use crate::target::TargetDescription;

pub trait Record: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

impl Record for FeatureParameters {
    const TYPE_NAME: &'static str = "FeatureParameters";
}

impl Record for TargetDescription {
    const TYPE_NAME: &'static str = "TargetDescription";
}

impl Record for FeatureSet {
    const TYPE_NAME: &'static str = "Results";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFile {
    records: Map<String, Value>,
}

impl RecordFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let records = serde_json::from_str(&text)?;
        Ok(Self { records })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.records)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Store `record`, replacing any previous record of its type
    pub fn insert<R: Record>(&mut self, record: &R) -> Result<()> {
        self.records
            .insert(R::TYPE_NAME.to_string(), serde_json::to_value(record)?);
        Ok(())
    }

    /// The record of type `R`, `None` if the file holds none
    pub fn get<R: Record>(&self) -> Result<Option<R>> {
        match self.records.get(R::TYPE_NAME) {
            Some(value) => Ok(Some(R::deserialize(value)?)),
            None => Ok(None),
        }
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Descriptors, KeyPoint, NormType};

    #[test]
    fn test_records_read_back() {
        let params = FeatureParameters::from_kind("fast_brief").unwrap();
        let target = TargetDescription::full_frame("a.png", 8, 8);
        let results = FeatureSet::new(
            vec![KeyPoint::new(1.5, 2.5, 7.0).with_response(3.0)],
            Descriptors::Binary {
                cols: 2,
                data: vec![0xab, 0x01],
            },
            NormType::Hamming,
        )
        .unwrap();

        let mut file = RecordFile::new();
        file.insert(&params).unwrap();
        file.insert(&target).unwrap();
        file.insert(&results).unwrap();

        let path = std::env::temp_dir().join(format!("records-{}.json", std::process::id()));
        file.save(&path).unwrap();
        let loaded = RecordFile::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.get::<FeatureParameters>().unwrap(), Some(params));
        assert_eq!(loaded.get::<TargetDescription>().unwrap(), Some(target));
        assert_eq!(loaded.get::<FeatureSet>().unwrap(), Some(results));
    }

    #[test]
    fn test_absent_record() {
        let file = RecordFile::new();
        assert_eq!(file.get::<FeatureSet>().unwrap(), None);
        assert_eq!(file.type_names().count(), 0);
    }
}
