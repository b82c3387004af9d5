//! Sequence-oriented read-only dataset
//!
//! A dataset is built of sequences; each sequence starts with a number of
//! unlabelled prefill inputs warming up the network memory, followed by the
//! labelled inputs the loss is computed on:
//!
//! ```text
//! Sequence 1:  Inputs [][][][][][]
//!              Labels     [][][][]
//! Sequence 2:  Inputs [][][][][][]
//!              Labels     [][][][]
//! ```
//!
//! Inputs and labels live in separate contiguous arrays for parallel access;
//! indexing is flat but sequence aware.

use crate::error::{DataError, Result};

/// Read-only contract feeding sequences into the training core
pub trait DatasetView {
    /// One input vector by flat index
    fn get_input_sample(&self, raw_index: usize) -> &[f64];

    /// One label vector by flat index
    fn get_label_sample(&self, raw_index: usize) -> &[f64];

    /// All input vectors
    fn get_input_samples(&self) -> &[Vec<f64>];

    /// All label vectors
    fn get_label_samples(&self) -> &[Vec<f64>];

    /// Length of one input vector
    fn input_size(&self) -> usize;

    /// Length of one label vector
    fn feature_size(&self) -> usize;

    /// Total number of input vectors
    fn number_of_input_samples(&self) -> usize;

    /// Total number of label vectors
    fn number_of_label_samples(&self) -> usize;

    /// Number of sequences in the dataset
    fn number_of_sequences(&self) -> usize;

    /// Number of labelled steps per sequence
    fn sequence_size(&self) -> usize;

    /// Number of unlabelled warm-up inputs per sequence
    fn prefill_inputs_number(&self) -> usize;

    /// Number of inputs per sequence, prefill included
    fn inputs_in_one_sequence(&self) -> usize {
        self.sequence_size() + self.prefill_inputs_number()
    }
}

/// Owned in-memory dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetImplementation {
    sequence_size: usize,
    prefill_inputs: usize,
    inputs: Vec<Vec<f64>>,
    labels: Vec<Vec<f64>>,
}

impl DatasetImplementation {
    /// Wrap input and label vectors, validating the sequence shape
    ///
    /// The input surplus over the labels must be an exact per-sequence
    /// prefill; irregular shapes are rejected instead of silently accepted.
    pub fn new(
        inputs: Vec<Vec<f64>>,
        labels: Vec<Vec<f64>>,
        sequence_size: usize,
    ) -> Result<Self> {
        if sequence_size == 0 {
            return Err(DataError::invalid_parameter(
                "sequence_size",
                "0",
                ">= 1",
            ));
        }
        if labels.is_empty() || inputs.is_empty() {
            return Err(DataError::inconsistent_shape(
                "datasets require at least one input and one label",
            ));
        }
        if labels.len() % sequence_size != 0 {
            return Err(DataError::inconsistent_shape(format!(
                "{} labels do not form whole sequences of size {}",
                labels.len(),
                sequence_size
            )));
        }
        if inputs.len() < labels.len() {
            return Err(DataError::inconsistent_shape(format!(
                "{} inputs cannot cover {} labels",
                inputs.len(),
                labels.len()
            )));
        }
        let number_of_sequences = labels.len() / sequence_size;
        let surplus = inputs.len() - labels.len();
        if surplus % number_of_sequences != 0 {
            return Err(DataError::inconsistent_shape(format!(
                "{} surplus inputs are not an exact prefill over {} sequences",
                surplus, number_of_sequences
            )));
        }

        let input_size = inputs[0].len();
        if input_size == 0 || inputs.iter().any(|sample| sample.len() != input_size) {
            return Err(DataError::inconsistent_shape(
                "every input vector must share one non-zero size",
            ));
        }
        let feature_size = labels[0].len();
        if feature_size == 0 || labels.iter().any(|sample| sample.len() != feature_size) {
            return Err(DataError::inconsistent_shape(
                "every label vector must share one non-zero size",
            ));
        }

        Ok(Self {
            sequence_size,
            prefill_inputs: surplus / number_of_sequences,
            inputs,
            labels,
        })
    }
}

impl DatasetView for DatasetImplementation {
    fn get_input_sample(&self, raw_index: usize) -> &[f64] {
        &self.inputs[raw_index]
    }

    fn get_label_sample(&self, raw_index: usize) -> &[f64] {
        &self.labels[raw_index]
    }

    fn get_input_samples(&self) -> &[Vec<f64>] {
        &self.inputs
    }

    fn get_label_samples(&self) -> &[Vec<f64>] {
        &self.labels
    }

    fn input_size(&self) -> usize {
        self.inputs[0].len()
    }

    fn feature_size(&self) -> usize {
        self.labels[0].len()
    }

    fn number_of_input_samples(&self) -> usize {
        self.inputs.len()
    }

    fn number_of_label_samples(&self) -> usize {
        self.labels.len()
    }

    fn number_of_sequences(&self) -> usize {
        self.labels.len() / self.sequence_size
    }

    fn sequence_size(&self) -> usize {
        self.sequence_size
    }

    fn prefill_inputs_number(&self) -> usize {
        self.prefill_inputs
    }
}

/// Flat logical record of a dataset
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DatasetRecord {
    /// Length of one input vector
    pub input_size: u32,
    /// Length of one label vector
    pub feature_size: u32,
    /// Number of labelled steps per sequence
    pub sequence_size: u32,
    /// Number of sequences described by the record
    pub possible_sequence_count: u32,
    /// Flat input values, sample-major
    pub inputs: Vec<f64>,
    /// Flat label values, sample-major
    pub labels: Vec<f64>,
}

impl DatasetRecord {
    /// Flatten a dataset into its logical record
    pub fn encode(dataset: &impl DatasetView) -> Self {
        Self {
            input_size: dataset.input_size() as u32,
            feature_size: dataset.feature_size() as u32,
            sequence_size: dataset.sequence_size() as u32,
            possible_sequence_count: dataset.number_of_sequences() as u32,
            inputs: dataset
                .get_input_samples()
                .iter()
                .flatten()
                .copied()
                .collect(),
            labels: dataset
                .get_label_samples()
                .iter()
                .flatten()
                .copied()
                .collect(),
        }
    }

    /// Rebuild the dataset from the flat record
    pub fn decode(&self) -> Result<DatasetImplementation> {
        if self.input_size == 0 || self.feature_size == 0 {
            return Err(DataError::inconsistent_shape(
                "record declares zero sized vectors",
            ));
        }
        if self.inputs.len() % self.input_size as usize != 0
            || self.labels.len() % self.feature_size as usize != 0
        {
            return Err(DataError::inconsistent_shape(
                "flat arrays do not divide into whole vectors",
            ));
        }
        let inputs = self
            .inputs
            .chunks(self.input_size as usize)
            .map(<[f64]>::to_vec)
            .collect();
        let labels = self
            .labels
            .chunks(self.feature_size as usize)
            .map(<[f64]>::to_vec)
            .collect();
        DatasetImplementation::new(inputs, labels, self.sequence_size as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors(count: usize, width: usize, offset: f64) -> Vec<Vec<f64>> {
        (0..count)
            .map(|i| (0..width).map(|j| offset + (i * width + j) as f64).collect())
            .collect()
    }

    #[test]
    fn test_prefill_derived_from_surplus() {
        // 3 sequences of 4 labels with 2 prefill inputs each
        let dataset =
            DatasetImplementation::new(vectors(18, 2, 0.0), vectors(12, 1, 100.0), 4).unwrap();
        assert_eq!(dataset.number_of_sequences(), 3);
        assert_eq!(dataset.prefill_inputs_number(), 2);
        assert_eq!(dataset.inputs_in_one_sequence(), 6);
        assert_eq!(dataset.get_label_sample(0), &[100.0]);
    }

    #[test]
    fn test_rejects_partial_sequences() {
        let result = DatasetImplementation::new(vectors(5, 1, 0.0), vectors(5, 1, 0.0), 2);
        assert!(matches!(result, Err(DataError::InconsistentShape { .. })));
    }

    #[test]
    fn test_rejects_irregular_prefill() {
        // 2 sequences, 5 surplus inputs: not an exact per-sequence prefill
        let result = DatasetImplementation::new(vectors(9, 1, 0.0), vectors(4, 1, 0.0), 2);
        assert!(matches!(result, Err(DataError::InconsistentShape { .. })));
    }

    #[test]
    fn test_rejects_mixed_vector_widths() {
        let mut inputs = vectors(4, 2, 0.0);
        inputs[2] = vec![1.0];
        let result = DatasetImplementation::new(inputs, vectors(4, 1, 0.0), 2);
        assert!(matches!(result, Err(DataError::InconsistentShape { .. })));
    }

    #[test]
    fn test_record_roundtrip_is_identity() {
        let dataset =
            DatasetImplementation::new(vectors(6, 3, 0.0), vectors(4, 2, 50.0), 2).unwrap();
        let record = DatasetRecord::encode(&dataset);
        assert_eq!(record.possible_sequence_count, 2);
        let decoded = record.decode().unwrap();
        assert_eq!(dataset, decoded);
        assert_eq!(DatasetRecord::encode(&decoded), record);
    }
}
