//! Feature construction
//!
//! A [`Feature`] looks at one subject's [`SubjectGroup`] and emits named
//! values. The run-scoped [`RunContext`] turns names into feature indices,
//! so every vector built in one run shares one [`FeatureMap`].
//!
//! Computation happens in two phases: per-subject emission (parallel with
//! the `parallel` feature) followed by sequential index assignment in
//! example order. Indices are therefore identical with and without rayon.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::SubjectId;
use crate::error::{Error, Result};
use crate::merge::SubjectGroup;
use crate::records::Value;

pub use builtin::{
    default_features, make_identifier, EventIndicators, FactValues, Statistic, ValueEventStats,
};

/// A feature definition
pub trait Feature: Send + Sync {
    /// Name used in failure messages
    fn name(&self) -> &str;

    /// Emit this feature's values for one subject
    ///
    /// # Errors
    /// Any error fails the feature for this subject only
    fn compute(&self, group: &SubjectGroup<'_>, out: &mut FeatureEmitter) -> Result<()>;
}

/// Collects `(description, value)` pairs for one subject
#[derive(Debug, Default)]
pub struct FeatureEmitter {
    values: Vec<(String, f64)>,
}

impl FeatureEmitter {
    pub fn emit(&mut self, description: impl Into<String>, value: f64) {
        self.values.push((description.into(), value));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Run-wide mapping from 1-based feature index to description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureMap {
    descriptions: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl FeatureMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a map from descriptions listed in index order
    ///
    /// # Errors
    /// Returns `InvalidInput` if a description repeats
    pub fn from_descriptions(descriptions: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut map = Self::new();
        for description in descriptions {
            if map.index_of(&description).is_some() {
                return Err(Error::InvalidInput(format!(
                    "Feature description `{description}` appears twice"
                )));
            }
            map.index_of_or_assign(&description);
        }
        Ok(map)
    }

    #[must_use]
    pub fn index_of(&self, description: &str) -> Option<usize> {
        self.index.get(description).copied()
    }

    /// Index for `description`, assigning the next one if it is new
    pub fn index_of_or_assign(&mut self, description: &str) -> usize {
        if let Some(i) = self.index_of(description) {
            return i;
        }
        self.descriptions.push(description.to_string());
        let index = self.descriptions.len();
        self.index.insert(description.to_string(), index);
        index
    }

    #[must_use]
    pub fn description(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.descriptions.get(i))
            .map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptions.is_empty()
    }

    /// `(index, description)` in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| (i + 1, d.as_str()))
    }
}

/// One subject's features, sorted by index
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub subject: SubjectId,
    pub label: Value,
    pub values: Vec<(usize, f64)>,
}

impl FeatureVector {
    /// Values for indices `1..=n`; absent features are `None`
    #[must_use]
    pub fn dense(&self, n: usize) -> Vec<Option<f64>> {
        let mut dense = vec![None; n];
        for &(index, value) in &self.values {
            if let Some(slot) = index.checked_sub(1).and_then(|i| dense.get_mut(i)) {
                *slot = Some(value);
            }
        }
        dense
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values
            .binary_search_by_key(&index, |&(i, _)| i)
            .ok()
            .map(|pos| self.values[pos].1)
    }
}

/// What happens to a subject whose feature computation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Omit the subject's vector and warn
    #[default]
    Skip,
    /// Abort the run
    Fatal,
}

/// Feature definitions plus the feature map for one run
pub struct RunContext {
    features: Vec<Arc<dyn Feature>>,
    map: FeatureMap,
    policy: FailurePolicy,
    skipped: Vec<SubjectId>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("features", &self.features.iter().map(|x| x.name()).collect::<Vec<_>>())
            .field("map", &self.map.len())
            .field("policy", &self.policy)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl RunContext {
    #[must_use]
    pub fn new(features: Vec<Arc<dyn Feature>>, policy: FailurePolicy) -> Self {
        Self {
            features,
            map: FeatureMap::new(),
            policy,
            skipped: Vec::new(),
        }
    }

    /// Context running the built-in feature set
    #[must_use]
    pub fn with_defaults(policy: FailurePolicy) -> Self {
        Self::new(default_features(), policy)
    }

    #[must_use]
    pub const fn feature_map(&self) -> &FeatureMap {
        &self.map
    }

    #[must_use]
    pub fn into_feature_map(self) -> FeatureMap {
        self.map
    }

    /// Subjects omitted because a feature failed
    #[must_use]
    pub fn skipped(&self) -> &[SubjectId] {
        &self.skipped
    }

    #[must_use]
    pub const fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Build one vector per group, in group order
    ///
    /// # Errors
    /// Returns `Error::Feature` for the first failing subject under
    /// [`FailurePolicy::Fatal`]
    pub fn build_vectors(&mut self, groups: &[SubjectGroup<'_>]) -> Result<Vec<FeatureVector>> {
        #[cfg(feature = "parallel")]
        let emitted: Vec<Result<Vec<(String, f64)>>> = groups
            .par_iter()
            .map(|group| emit_all(&self.features, group))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let emitted: Vec<Result<Vec<(String, f64)>>> = groups
            .iter()
            .map(|group| emit_all(&self.features, group))
            .collect();

        let mut vectors = Vec::with_capacity(groups.len());
        for (group, result) in groups.iter().zip(emitted) {
            let pairs = match result {
                Ok(pairs) => pairs,
                Err(e) => match self.policy {
                    FailurePolicy::Fatal => return Err(e),
                    FailurePolicy::Skip => {
                        warn!(subject = %group.subject(), error = %e, "Omitting feature vector");
                        self.skipped.push(group.subject().clone());
                        continue;
                    }
                },
            };
            // Later emissions for the same description overwrite earlier ones
            let mut values = BTreeMap::new();
            for (description, value) in pairs {
                values.insert(self.map.index_of_or_assign(&description), value);
            }
            vectors.push(FeatureVector {
                subject: group.subject().clone(),
                label: group.label().clone(),
                values: values.into_iter().collect(),
            });
        }
        debug!(
            vectors = vectors.len(),
            features = self.map.len(),
            skipped = self.skipped.len(),
            "Built feature vectors"
        );
        Ok(vectors)
    }
}

fn emit_all(features: &[Arc<dyn Feature>], group: &SubjectGroup<'_>) -> Result<Vec<(String, f64)>> {
    let mut out = FeatureEmitter::default();
    for feature in features {
        feature.compute(group, &mut out).map_err(|e| Error::Feature {
            subject: group.subject().to_string(),
            feature: feature.name().to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(out.values)
}
