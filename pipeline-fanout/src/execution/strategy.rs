// Loop Strategy Expansion
// Expands parallel, matrix and items strategies into child specifications

use crate::execution::models::{ChildSpec, LoopMetadata};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared looping strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopStrategy {
    /// N identical copies
    Parallel(u32),
    /// One copy per axis combination, in declaration order
    Matrix(Vec<BTreeMap<String, String>>),
    /// One copy per item
    Items(Vec<String>),
}

/// Expander turning a strategy into candidate children
pub struct LoopExpander;

impl LoopExpander {
    /// Expand a strategy for the given child node
    pub fn expand(candidate_node_id: &str, strategy: &LoopStrategy) -> Vec<ChildSpec> {
        match strategy {
            LoopStrategy::Parallel(count) => Self::parallel(candidate_node_id, *count),
            LoopStrategy::Matrix(combinations) => Self::matrix(candidate_node_id, combinations),
            LoopStrategy::Items(items) => Self::items(candidate_node_id, items),
        }
    }

    /// Expand a parallel count into identical children
    pub fn parallel(candidate_node_id: &str, count: u32) -> Vec<ChildSpec> {
        (0..count)
            .map(|i| ChildSpec::new(candidate_node_id).with_loop(LoopMetadata::new(i, count)))
            .collect()
    }

    /// Expand matrix combinations into one child each
    pub fn matrix(
        candidate_node_id: &str,
        combinations: &[BTreeMap<String, String>],
    ) -> Vec<ChildSpec> {
        let total = combinations.len() as u32;
        combinations
            .iter()
            .enumerate()
            .map(|(i, combination)| {
                let mut metadata = LoopMetadata::new(i as u32, total);
                metadata.matrix_values = combination.clone();
                ChildSpec::new(candidate_node_id).with_loop(metadata)
            })
            .collect()
    }

    /// Expand an item list into one child per item
    pub fn items(candidate_node_id: &str, items: &[String]) -> Vec<ChildSpec> {
        let total = items.len() as u32;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                ChildSpec::new(candidate_node_id)
                    .with_loop(LoopMetadata::new(i as u32, total).with_item(item.clone()))
            })
            .collect()
    }
}

/// Builder for matrix combinations
#[derive(Default)]
pub struct MatrixBuilder {
    combinations: Vec<BTreeMap<String, String>>,
}

impl MatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a combination with a single axis value
    pub fn add_simple(mut self, axis: impl Into<String>, value: impl Into<String>) -> Self {
        let mut combination = BTreeMap::new();
        combination.insert(axis.into(), value.into());
        self.combinations.push(combination);
        self
    }

    /// Add a full combination
    pub fn add_combination(mut self, combination: BTreeMap<String, String>) -> Self {
        self.combinations.push(combination);
        self
    }

    pub fn build(self) -> LoopStrategy {
        LoopStrategy::Matrix(self.combinations)
    }
}
