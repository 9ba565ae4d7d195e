//! Writers for feature vectors and the feature map
//!
//! The feature map is written as `index|description` rows in index order.
//! Vectors are written either dense (`subject_id,label,<descriptions...>`,
//! absent features left empty) or sparse (`subject_id label index:value ...`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::features::{FeatureMap, FeatureVector};
use crate::records::Value;

/// Layout of the vectors file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorFormat {
    #[default]
    Dense,
    Sparse,
}

/// How labels are written
///
/// With no positive labels configured, labels are written as they are.
/// Otherwise a label matching one of them is written `1`, anything else `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelEncoding {
    positive: Vec<String>,
}

impl LabelEncoding {
    #[must_use]
    pub fn new<S: Into<String>>(positive: impl IntoIterator<Item = S>) -> Self {
        Self {
            positive: positive.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn encode(&self, label: &Value) -> String {
        if self.positive.is_empty() {
            return label.to_string();
        }
        let text = label.to_string();
        if self.positive.iter().any(|p| *p == text) {
            "1".to_string()
        } else {
            "0".to_string()
        }
    }
}

/// Write the feature map
///
/// # Errors
/// Returns an error if writing fails
pub fn write_feature_map<W: Write>(map: &FeatureMap, writer: W) -> Result<()> {
    let mut out = csv::WriterBuilder::new().delimiter(b'|').from_writer(writer);
    out.write_record(["index", "description"])?;
    for (index, description) in map.iter() {
        out.write_record([index.to_string().as_str(), description])?;
    }
    out.flush()?;
    Ok(())
}

/// Read a feature map written by [`write_feature_map`]
///
/// # Errors
/// Returns `InvalidInput` if indices are not `1, 2, ...` in order
pub fn read_feature_map(path: impl AsRef<Path>) -> Result<FeatureMap> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .from_path(path.as_ref())?;
    let mut descriptions = Vec::new();
    for (expected, row) in (1_usize..).zip(reader.records()) {
        let row = row?;
        let index: usize = row
            .get(0)
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::InvalidInput(format!("Bad feature index in row {expected}")))?;
        if index != expected {
            return Err(Error::InvalidInput(format!(
                "Feature map index {index} found where {expected} was expected"
            )));
        }
        descriptions.push(row.get(1).unwrap_or_default().to_string());
    }
    FeatureMap::from_descriptions(descriptions)
}

/// Write vectors in the given layout
///
/// # Errors
/// Returns an error if writing fails
pub fn write_vectors<W: Write>(
    vectors: &[FeatureVector],
    map: &FeatureMap,
    format: VectorFormat,
    labels: &LabelEncoding,
    writer: W,
) -> Result<()> {
    match format {
        VectorFormat::Dense => {
            let mut out = csv::Writer::from_writer(writer);
            let mut header = vec!["subject_id".to_string(), "label".to_string()];
            header.extend(map.iter().map(|(_, d)| d.to_string()));
            out.write_record(&header)?;
            for vector in vectors {
                let mut row = vec![vector.subject.to_string(), labels.encode(&vector.label)];
                row.extend(
                    vector
                        .dense(map.len())
                        .into_iter()
                        .map(|v| v.map(|x| x.to_string()).unwrap_or_default()),
                );
                out.write_record(&row)?;
            }
            out.flush()?;
        }
        VectorFormat::Sparse => {
            let mut out = BufWriter::new(writer);
            for vector in vectors {
                write!(out, "{} {}", vector.subject, labels.encode(&vector.label))?;
                for (index, value) in &vector.values {
                    write!(out, " {index}:{value}")?;
                }
                writeln!(out)?;
            }
            out.flush()?;
        }
    }
    Ok(())
}

/// Write the vectors file and the feature map file
///
/// # Errors
/// Returns an error if either file cannot be written
pub fn write_outputs(
    vectors: &[FeatureVector],
    map: &FeatureMap,
    format: VectorFormat,
    labels: &LabelEncoding,
    vectors_path: &Path,
    map_path: &Path,
) -> Result<()> {
    write_vectors(vectors, map, format, labels, File::create(vectors_path)?)?;
    write_feature_map(map, File::create(map_path)?)?;
    info!(
        vectors = vectors.len(),
        features = map.len(),
        path = %vectors_path.display(),
        "Wrote feature vectors"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SubjectId;

    fn sample() -> (Vec<FeatureVector>, FeatureMap) {
        let map =
            FeatureMap::from_descriptions(["rx-drugA".to_string(), "demo-age".to_string()])
                .unwrap();
        let vectors = vec![
            FeatureVector {
                subject: SubjectId::Int(1),
                label: Value::from("G"),
                values: vec![(1, 1.0), (2, 42.5)],
            },
            FeatureVector {
                subject: SubjectId::Int(2),
                label: Value::from("B"),
                values: vec![(2, 30.0)],
            },
        ];
        (vectors, map)
    }

    #[test]
    fn test_dense_output() {
        let (vectors, map) = sample();
        let mut buf = Vec::new();
        let labels = LabelEncoding::default();
        write_vectors(&vectors, &map, VectorFormat::Dense, &labels, &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "subject_id,label,rx-drugA,demo-age\n1,G,1,42.5\n2,B,,30\n"
        );
    }

    #[test]
    fn test_sparse_output_with_positive_labels() {
        let (vectors, map) = sample();
        let mut buf = Vec::new();
        let labels = LabelEncoding::new(["G"]);
        write_vectors(&vectors, &map, VectorFormat::Sparse, &labels, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "1 1 1:1 2:42.5\n2 0 2:30\n");
    }

    #[test]
    fn test_feature_map_file() {
        let (_, map) = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.psv");
        write_feature_map(&map, File::create(&path).unwrap()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "index|description\n1|rx-drugA\n2|demo-age\n"
        );
        assert_eq!(read_feature_map(&path).unwrap(), map);
    }
}
