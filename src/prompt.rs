//! Layered prompt representation.
//!
//! A prompt is not a single string but an ordered set of attributed
//! components — system instructions, application framing, the user's own
//! text, prior assistant turns, and surrounding context — each evaluated and
//! aggregated independently, then combined with priority-weighting in
//! [`crate::ayni`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::neutrosophic::NeutrosophicValue;

/// The named position of a layer in a prompt, in priority order
/// (`System > Application > User > Assistant > Context`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerName {
    System,
    Application,
    User,
    Assistant,
    Context,
}

impl LayerName {
    /// Relative priority; lower is higher-priority. Used for violation
    /// detection (e.g. a layer "speaking as" a higher-priority one).
    pub fn priority(&self) -> u8 {
        match self {
            LayerName::System => 0,
            LayerName::Application => 1,
            LayerName::User => 2,
            LayerName::Assistant => 3,
            LayerName::Context => 4,
        }
    }

    /// Weight used when combining layers into an ayni balance. Only
    /// system/application/user carry weight per spec §9's resolved open
    /// question; assistant/context are excluded from the weighted balance.
    pub fn ayni_weight(&self) -> Option<f64> {
        match self {
            LayerName::System => Some(3.0),
            LayerName::Application => Some(2.0),
            LayerName::User => Some(1.0),
            LayerName::Assistant | LayerName::Context => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerName::System => "system",
            LayerName::Application => "application",
            LayerName::User => "user",
            LayerName::Assistant => "assistant",
            LayerName::Context => "context",
        }
    }
}

impl std::fmt::Display for LayerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attributed component of a layered prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub name: LayerName,
    pub content: String,
    pub evaluations: Vec<NeutrosophicValue>,
}

impl Layer {
    pub fn new(name: LayerName, content: impl Into<String>) -> Self {
        Self {
            name,
            content: content.into(),
            evaluations: Vec::new(),
        }
    }

    pub fn with_evaluation(mut self, value: NeutrosophicValue) -> Self {
        self.evaluations.push(value);
        self
    }

    pub fn add_evaluation(&mut self, value: NeutrosophicValue) {
        self.evaluations.push(value);
    }

    /// Aggregates all evaluations recorded for this layer: mean T, mean I, max F.
    pub fn aggregate(&self) -> NeutrosophicValue {
        NeutrosophicValue::aggregate(&self.evaluations)
    }

    pub fn approx_tokens(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// An ordered set of layers, at most one per [`LayerName`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiLayerPrompt {
    layers: BTreeMap<LayerName, Layer>,
}

impl MultiLayerPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the layer with the given name.
    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.insert(layer.name, layer);
        self
    }

    pub fn set_layer(&mut self, layer: Layer) {
        self.layers.insert(layer.name, layer);
    }

    pub fn layer(&self, name: LayerName) -> Option<&Layer> {
        self.layers.get(&name)
    }

    pub fn layer_mut(&mut self, name: LayerName) -> Option<&mut Layer> {
        self.layers.get_mut(&name)
    }

    /// Layers in priority order (`System` first), independent of insertion order.
    pub fn layers_in_priority_order(&self) -> Vec<&Layer> {
        self.layers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.layers.values().map(Layer::approx_tokens).sum()
    }

    /// Names the layer consuming the largest share of total token budget,
    /// and that share, used by [`crate::ayni`]'s `context_saturation` check.
    pub fn dominant_layer_share(&self) -> Option<(LayerName, f64)> {
        let total = self.total_tokens();
        if total == 0 {
            return None;
        }
        self.layers
            .values()
            .map(|l| (l.name, l.approx_tokens() as f64 / total as f64))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_most_one_layer_per_name() {
        let prompt = MultiLayerPrompt::new()
            .with_layer(Layer::new(LayerName::User, "first"))
            .with_layer(Layer::new(LayerName::User, "second"));
        assert_eq!(prompt.len(), 1);
        assert_eq!(prompt.layer(LayerName::User).unwrap().content, "second");
    }

    #[test]
    fn test_priority_order_independent_of_insertion() {
        let prompt = MultiLayerPrompt::new()
            .with_layer(Layer::new(LayerName::User, "u"))
            .with_layer(Layer::new(LayerName::System, "s"));
        let names: Vec<_> = prompt
            .layers_in_priority_order()
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec![LayerName::System, LayerName::User]);
    }

    #[test]
    fn test_ayni_weight_excludes_assistant_and_context() {
        assert!(LayerName::Assistant.ayni_weight().is_none());
        assert!(LayerName::Context.ayni_weight().is_none());
        assert_eq!(LayerName::System.ayni_weight(), Some(3.0));
    }

    #[test]
    fn test_layer_aggregate_empty_is_neutral() {
        let layer = Layer::new(LayerName::User, "hi");
        assert_eq!(layer.aggregate(), NeutrosophicValue::neutral());
    }
}
