//! Datafile model.

use serde::{Deserialize, Deserializer};

use super::id_from_uri;

/// A stored copy of a datafile.
#[derive(Debug, Clone, Deserialize)]
pub struct Replica {
    /// Location of the copy, relative to its storage box.
    pub url: String,
    /// Name of the storage location.
    #[serde(default)]
    pub location: Option<String>,
    /// Whether the copy has been checksum-verified.
    #[serde(default)]
    pub verified: bool,
}

/// A single file within a dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct Datafile {
    /// Object id.
    pub id: u64,
    /// Resource URI of the owning dataset.
    #[serde(default)]
    pub dataset: Option<String>,
    /// File name, without directory.
    pub filename: String,
    /// Slash-separated subdirectory inside the dataset, if any.
    #[serde(default)]
    pub directory: Option<String>,
    /// Size in bytes. Servers send this as a number or a string; junk becomes `None`.
    #[serde(default, deserialize_with = "lenient_size")]
    pub size: Option<u64>,
    /// Creation timestamp.
    #[serde(default)]
    pub created_time: Option<String>,
    /// Modification timestamp.
    #[serde(default)]
    pub modification_time: Option<String>,
    /// Stored copies.
    #[serde(default)]
    pub replicas: Vec<Replica>,
}

impl Datafile {
    /// Id of the owning dataset, when the URI is present and well-formed.
    #[must_use]
    pub fn dataset_id(&self) -> Option<u64> {
        self.dataset.as_deref().and_then(id_from_uri)
    }
}

/// Deserialize a size that may arrive as a number, a numeric string or junk.
///
/// Anything that is not a non-negative integer becomes `None` instead of failing the record.
pub fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_accepts_numbers_and_strings() {
        let numeric: Datafile =
            serde_json::from_str(r#"{"id": 1, "filename": "a", "size": 42}"#).unwrap();
        assert_eq!(numeric.size, Some(42));

        let stringy: Datafile =
            serde_json::from_str(r#"{"id": 1, "filename": "a", "size": "1024"}"#).unwrap();
        assert_eq!(stringy.size, Some(1024));

        let junk: Datafile =
            serde_json::from_str(r#"{"id": 1, "filename": "a", "size": "lots"}"#).unwrap();
        assert_eq!(junk.size, None, "unparseable sizes should not fail the record");
    }

    #[test]
    fn dataset_id_comes_from_uri() {
        let df: Datafile = serde_json::from_str(
            r#"{"id": 9, "filename": "scan.dat", "dataset": "/api/v1/dataset/5/"}"#,
        )
        .unwrap();
        assert_eq!(df.dataset_id(), Some(5));
    }
}
