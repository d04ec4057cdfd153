//! Class label table for the classifier
//!
//! The label set is fixed at load time. The on-disk format is the hub's
//! `id2label` JSON (a map from stringified class index to label name), the
//! same file torchvision derives its category metadata from.

use crate::error::{VisionError, VisionResult};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Ordered, immutable list of class labels, indexed by class id
#[derive(Debug, Clone)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    /// Build a label table from an ordered list of names
    #[must_use]
    pub fn from_names(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load an `id2label` JSON file (`{"0": "tench", "1": "goldfish", ...}`).
    ///
    /// Keys must form a contiguous range starting at zero; a gap means the
    /// file does not describe the label set the classifier was trained with.
    pub fn from_id2label_file(path: &Path) -> VisionResult<Self> {
        let file = File::open(path)?;
        let raw: HashMap<String, String> = serde_json::from_reader(BufReader::new(file))?;

        let class_count = raw.len();
        let mut names = vec![None; class_count];
        for (key, label) in raw {
            let index: usize = key.parse().map_err(|_| {
                VisionError::ModelLoad(format!("non-numeric label index '{key}'"))
            })?;
            match names.get_mut(index) {
                Some(slot) => *slot = Some(label),
                None => {
                    return Err(VisionError::ModelLoad(format!(
                        "label index {index} out of range for {} classes",
                        class_count
                    )))
                }
            }
        }

        let names = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| {
                name.ok_or_else(|| {
                    VisionError::ModelLoad(format!("label table has a gap at index {index}"))
                })
            })
            .collect::<VisionResult<Vec<_>>>()?;

        Ok(Self { names })
    }

    /// Label name for a class index
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Number of classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// The full ordered label list
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_json(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_id2label_roundtrip() {
        let file = write_json(r#"{"1": "goldfish", "0": "tench", "2": "great white shark"}"#);
        let labels = Labels::from_id2label_file(file.path()).unwrap();

        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get(0), Some("tench"));
        assert_eq!(labels.get(1), Some("goldfish"));
        assert_eq!(labels.get(2), Some("great white shark"));
        assert_eq!(labels.get(3), None);
    }

    #[test]
    fn test_gap_in_table_rejected() {
        let file = write_json(r#"{"0": "tench", "2": "shark"}"#);
        let result = Labels::from_id2label_file(file.path());
        assert!(matches!(result, Err(VisionError::ModelLoad(_))));
    }

    #[test]
    fn test_non_numeric_key_rejected() {
        let file = write_json(r#"{"zero": "tench"}"#);
        let result = Labels::from_id2label_file(file.path());
        assert!(matches!(result, Err(VisionError::ModelLoad(_))));
    }

    #[test]
    fn test_from_names() {
        let labels = Labels::from_names(vec!["cat".to_string(), "dog".to_string()]);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.as_slice()[1], "dog");
    }
}
