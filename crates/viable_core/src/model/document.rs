//! Document aggregate and entity records.
//!
//! # Responsibility
//! - Describe the ten collections of the document of record.
//! - Map every field to its persisted JSON name.
//!
//! # Invariants
//! - Optional fields are omitted from JSON when `None`, never written as `null`.
//! - Enum wire strings are stable across schema versions; migrations never
//!   rename them.

use serde::{Deserialize, Serialize};

/// Root aggregate persisted as one JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub schema_version: u32,
    pub nodes: Vec<Node>,
    pub variables: Vec<Variable>,
    pub episodes: Vec<Episode>,
    pub actions: Vec<Action>,
    pub notes: Vec<Note>,
    pub models: Vec<Model>,
    pub links: Vec<Link>,
    pub exceptions: Vec<MembraneException>,
    pub proxies: Vec<Proxy>,
    pub proxy_readings: Vec<ProxyReading>,
}

impl Document {
    /// Creates a document with every collection empty.
    pub fn empty(schema_version: u32) -> Self {
        Self {
            schema_version,
            nodes: Vec::new(),
            variables: Vec::new(),
            episodes: Vec::new(),
            actions: Vec::new(),
            notes: Vec::new(),
            models: Vec::new(),
            links: Vec::new(),
            exceptions: Vec::new(),
            proxies: Vec::new(),
            proxy_readings: Vec::new(),
        }
    }

    /// Number of entities across all collections.
    pub fn entity_count(&self) -> usize {
        self.nodes.len()
            + self.variables.len()
            + self.episodes.len()
            + self.actions.len()
            + self.notes.len()
            + self.models.len()
            + self.links.len()
            + self.exceptions.len()
            + self.proxies.len()
            + self.proxy_readings.len()
    }
}

/// Kind of regulated unit a variable or episode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Personal,
    Org,
}

impl NodeType {
    pub const ALL: &'static [&'static str] = &["Personal", "Org"];

    /// Node id assigned to this type when bare node types were upgraded to refs.
    pub fn default_node_id(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Org => "org",
        }
    }
}

/// Address of one concrete node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub id: String,
}

impl NodeRef {
    pub fn new(node_type: NodeType, id: impl Into<String>) -> Self {
        Self {
            node_type,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeType,
    pub name: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableStatus {
    InRange,
    Low,
    High,
    Unknown,
}

impl VariableStatus {
    pub const ALL: &'static [&'static str] = &["InRange", "Low", "High", "Unknown"];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: &'static [&'static str] = &["Daily", "Weekly", "Monthly"];
}

/// Essential variable whose range the user tries to keep viable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub id: String,
    pub node: NodeRef,
    pub name: String,
    pub status: VariableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<Cadence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeType {
    Stabilize,
    Explore,
}

impl EpisodeType {
    pub const ALL: &'static [&'static str] = &["Stabilize", "Explore"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeStatus {
    Active,
    Closed,
}

impl EpisodeStatus {
    pub const ALL: &'static [&'static str] = &["Active", "Closed"];
}

/// Time-boxed effort to stabilize a variable or explore an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub node: NodeRef,
    #[serde(rename = "type")]
    pub kind: EpisodeType,
    pub status: EpisodeStatus,
    pub objective: String,
    /// Soft reference; not checked against `variables`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_id: Option<String>,
    pub opened_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    /// Length of the box in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timebox: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Done,
}

impl ActionStatus {
    pub const ALL: &'static [&'static str] = &["Pending", "Done"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub description: String,
    pub status: ActionStatus,
    /// Hard reference into `episodes` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub content: String,
    pub created_at: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_objects: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    Descriptive,
    Procedural,
    Normative,
}

impl ModelType {
    pub const ALL: &'static [&'static str] = &["Descriptive", "Procedural", "Normative"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enforcement {
    None,
    Warn,
    Block,
}

impl Enforcement {
    pub const ALL: &'static [&'static str] = &["None", "Warn", "Block"];
}

/// A belief or rule the user holds about how their system works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ModelType,
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement: Option<Enforcement>,
    /// Within `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    PartOf,
    Supports,
    Undermines,
    Tests,
    Informs,
}

impl LinkRelation {
    pub const ALL: &'static [&'static str] =
        &["part_of", "supports", "undermines", "tests", "informs"];
    pub const PART_OF: &'static str = "part_of";
}

/// Typed edge between any two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation: LinkRelation,
    /// Within `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Warn,
    Block,
}

impl Decision {
    pub const ALL: &'static [&'static str] = &["Warn", "Block"];
}

/// Recorded override of a model's enforcement decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembraneException {
    pub id: String,
    pub model_id: String,
    pub original_decision: Decision,
    pub justification: String,
    pub mutation_type: String,
    pub mutation_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyValueType {
    Numeric,
    Boolean,
    Categorical,
}

impl ProxyValueType {
    pub const ALL: &'static [&'static str] = &["numeric", "boolean", "categorical"];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

/// Observable signal standing in for a variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    pub id: String,
    pub variable_id: String,
    pub name: String,
    pub value_type: ProxyValueType,
    /// Only for `numeric` proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
    /// Only for `categorical` proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

/// Reading value, tagged with the proxy value type it satisfies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ProxyValue {
    Numeric(f64),
    Boolean(bool),
    Categorical(String),
}

impl ProxyValue {
    pub fn value_type(&self) -> ProxyValueType {
        match self {
            Self::Numeric(_) => ProxyValueType::Numeric,
            Self::Boolean(_) => ProxyValueType::Boolean,
            Self::Categorical(_) => ProxyValueType::Categorical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyReading {
    pub id: String,
    pub proxy_id: String,
    pub value: ProxyValue,
    pub recorded_at: String,
}

#[cfg(test)]
mod tests {
    use super::{LinkRelation, NodeRef, NodeType, ProxyValue, ProxyValueType};

    #[test]
    fn proxy_value_uses_adjacent_tagging() {
        let value = serde_json::to_value(ProxyValue::Categorical("calm".to_string())).unwrap();
        assert_eq!(value, serde_json::json!({"type": "categorical", "value": "calm"}));
        assert_eq!(
            ProxyValue::Boolean(true).value_type(),
            ProxyValueType::Boolean
        );
    }

    #[test]
    fn node_ref_serializes_type_field() {
        let value = serde_json::to_value(NodeRef::new(NodeType::Org, "org")).unwrap();
        assert_eq!(value, serde_json::json!({"type": "Org", "id": "org"}));
    }

    #[test]
    fn enum_wire_tables_match_serde_names() {
        let relation = serde_json::to_value(LinkRelation::PartOf).unwrap();
        assert_eq!(relation, LinkRelation::PART_OF);
        for (value, expected) in [
            (serde_json::to_value(NodeType::Personal).unwrap(), NodeType::ALL[0]),
            (serde_json::to_value(ProxyValueType::Numeric).unwrap(), ProxyValueType::ALL[0]),
        ] {
            assert_eq!(value, expected);
        }
    }
}
