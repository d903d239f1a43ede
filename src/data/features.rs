/// Bag-of-bigrams features for the log-linear classifier
use std::collections::HashMap;

use candle_core::{Device, Tensor};

use crate::{Result, TaggerError};

/// Character bigrams of `text`, in order
pub fn text_to_bigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|pair| pair.iter().collect()).collect()
}

/// Feature vocabulary: the `max_features` most frequent features
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FeatureIndex {
    feature_to_idx: HashMap<String, usize>,
}

impl FeatureIndex {
    /// Count features across examples and keep the most frequent ones
    ///
    /// Ties are broken by first appearance, so the index is deterministic.
    pub fn from_examples<'a, I, F>(examples: I, max_features: usize) -> Self
    where
        I: IntoIterator<Item = F>,
        F: IntoIterator<Item = &'a String>,
    {
        let mut counts: Vec<(&'a String, usize)> = Vec::new();
        let mut slots: HashMap<&'a String, usize> = HashMap::new();
        for features in examples {
            for feature in features {
                match slots.get(feature) {
                    Some(&slot) => counts[slot].1 += 1,
                    None => {
                        slots.insert(feature, counts.len());
                        counts.push((feature, 1));
                    }
                }
            }
        }

        // Stable sort keeps first-appearance order among equal counts
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let feature_to_idx = counts
            .into_iter()
            .take(max_features)
            .enumerate()
            .map(|(idx, (feature, _))| (feature.clone(), idx))
            .collect();

        Self { feature_to_idx }
    }

    pub fn len(&self) -> usize {
        self.feature_to_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_to_idx.is_empty()
    }

    pub fn index(&self, feature: &str) -> Option<usize> {
        self.feature_to_idx.get(feature).copied()
    }

    /// Count vector over the vocabulary; unknown features are ignored
    pub fn vectorize<S: AsRef<str>>(&self, features: &[S], device: &Device) -> Result<Tensor> {
        if self.is_empty() {
            return Err(TaggerError::Config("feature index is empty".to_string()));
        }
        let mut counts = vec![0f64; self.len()];
        for feature in features {
            if let Some(idx) = self.index(feature.as_ref()) {
                counts[idx] += 1.0;
            }
        }
        Ok(Tensor::from_vec(counts, self.len(), device)?)
    }
}
