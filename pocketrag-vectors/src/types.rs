//! Records, results and metrics

use crate::error::{Result, VectorError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-chosen integer key of a stored vector.
pub type RowId = i64;

/// Longest accepted collection name
pub const MAX_COLLECTION_NAME: usize = 64;

/// One stored vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub rowid: RowId,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(rowid: RowId, vector: Vec<f32>) -> Self {
        Self { rowid, vector }
    }
}

/// A query hit. Smaller distances are more similar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub rowid: RowId,
    pub distance: f32,
}

/// Summary of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dim: usize,
}

/// Distance function used by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Euclidean distance
    #[default]
    L2,
    /// `1 - cos(a, b)`
    Cosine,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        })
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            other => Err(format!("unknown metric {other:?} (expected l2 or cosine)")),
        }
    }
}

pub(crate) fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(VectorError::InvalidCollectionName {
            name: name.to_string(),
        })
    }
}

pub(crate) fn validate_vector(vector: &[f32]) -> Result<()> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(VectorError::InvalidVector {
            index,
            value: f64::from(vector[index]),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert!(validate_collection_name("documents").is_ok());
        assert!(validate_collection_name("docs_v2-en").is_ok());
        assert!(validate_collection_name(&"a".repeat(64)).is_ok());

        for bad in ["", "has space", "semi;colon", "quote'", "é", &"a".repeat(65)] {
            assert!(
                matches!(
                    validate_collection_name(bad),
                    Err(VectorError::InvalidCollectionName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_vector_reports_first_bad_component() {
        assert!(validate_vector(&[0.0, -1.5, 3.0]).is_ok());
        match validate_vector(&[0.0, f32::NAN, f32::INFINITY]) {
            Err(VectorError::InvalidVector { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(validate_vector(&[f32::NEG_INFINITY]).is_err());
    }

    #[test]
    fn test_metric_parse_and_display() {
        assert_eq!("L2".parse::<Metric>(), Ok(Metric::L2));
        assert_eq!("cosine".parse::<Metric>(), Ok(Metric::Cosine));
        assert!("dot".parse::<Metric>().is_err());
        assert_eq!(Metric::Cosine.to_string(), "cosine");
        assert_eq!(Metric::default(), Metric::L2);
    }
}
