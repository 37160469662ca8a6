use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::{DataError, RawRecord};

/// The diseases the classifier is trained on, in label-vector index order.
pub const DEFAULT_DISEASES: [&str; 24] = [
    "Psoriasis",
    "Varicose Veins",
    "Typhoid",
    "Chicken pox",
    "Impetigo",
    "Dengue",
    "Fungal infection",
    "Common Cold",
    "Pneumonia",
    "Dimorphic Hemorrhoids",
    "Arthritis",
    "Acne",
    "Bronchial Asthma",
    "Hypertension",
    "Migraine",
    "Cervical spondylosis",
    "Jaundice",
    "Malaria",
    "urinary tract infection",
    "allergy",
    "gastroesophageal reflux disease",
    "drug reaction",
    "peptic ulcer disease",
    "diabetes",
];

/// A multi-hot vector with one slot per vocabulary entry.
pub type LabelVector = Vec<f32>;

/// Ordered, immutable set of disease names.
///
/// Position in the vocabulary is the index of the matching classifier
/// output, so the order must survive every save/load round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseVocabulary {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Default for DiseaseVocabulary {
    fn default() -> Self {
        // The default list has no duplicates or blanks.
        let names: Vec<String> = DEFAULT_DISEASES.iter().map(|s| s.to_string()).collect();
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Self { names, index }
    }
}

impl DiseaseVocabulary {
    /// Builds a vocabulary from an ordered list of names.
    ///
    /// # Errors
    /// `InvalidVocabulary` for an empty list, an empty name or a duplicate.
    pub fn new<I, S>(names: I) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DataError::InvalidVocabulary("vocabulary cannot be empty".into()));
        }
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(DataError::InvalidVocabulary(format!("entry {} is empty", i + 1)));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(DataError::InvalidVocabulary(format!("duplicate entry '{}'", name)));
            }
        }
        Ok(Self { names, index })
    }

    /// Reads `diseases.txt`: one name per line, line order is index order.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let contents = fs::read_to_string(path)?;
        let mut lines: Vec<&str> = contents.lines().collect();
        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        Self::new(lines.into_iter().map(|l| l.trim_end_matches('\r')))
    }

    /// Writes the vocabulary as newline-separated names.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        fs::write(path, self.names.join("\n"))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Exact, case-sensitive lookup.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns the name at the highest-scoring index, first index on ties.
    pub fn decode(&self, vector: &[f32]) -> Option<&str> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &v) in vector.iter().enumerate().take(self.names.len()) {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.and_then(|(i, _)| self.name(i))
    }
}

/// Turns single disease labels into multi-hot vectors over a fixed vocabulary.
#[derive(Debug, Clone)]
pub struct LabelBinarizer {
    vocabulary: DiseaseVocabulary,
}

impl LabelBinarizer {
    pub fn new(vocabulary: DiseaseVocabulary) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &DiseaseVocabulary {
        &self.vocabulary
    }

    /// Binarizes one label. `row` is only used for error reporting.
    pub fn binarize(&self, label: &str, row: usize) -> Result<LabelVector, DataError> {
        self.binarize_many(std::iter::once(label), row)
    }

    /// Binarizes a set of labels belonging to the same record.
    pub fn binarize_many<'a, I>(&self, labels: I, row: usize) -> Result<LabelVector, DataError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vector = vec![0.0; self.vocabulary.len()];
        for label in labels {
            let idx = self.vocabulary.index_of(label).ok_or_else(|| DataError::UnknownLabel {
                row,
                label: label.to_string(),
            })?;
            vector[idx] = 1.0;
        }
        Ok(vector)
    }

    /// Binarizes every record's label, preserving row order.
    ///
    /// Row numbers in errors are 1-based.
    pub fn transform(&self, records: &[RawRecord]) -> Result<Vec<LabelVector>, DataError> {
        records
            .iter()
            .enumerate()
            .map(|(i, r)| self.binarize(&r.label, i + 1))
            .collect()
    }
}

impl Default for LabelBinarizer {
    fn default() -> Self {
        Self::new(DiseaseVocabulary::default())
    }
}
