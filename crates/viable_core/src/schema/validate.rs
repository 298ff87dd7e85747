//! Generic structural and referential validator.
//!
//! # Responsibility
//! - Decide whether an untrusted JSON payload is a valid instance of one
//!   `SchemaDescriptor`.
//!
//! # Invariants
//! - Pure predicate: no I/O and no logging.
//! - Checks run in a fixed order: version tag, collection shape, id
//!   uniqueness, entry structure, hard references.
//! - `part_of` links are admitted in document order; an edge that would
//!   close a cycle in the parent graph is rejected.

use super::descriptor::{
    NodeAddressing, SchemaDescriptor, ACTIONS, BASE_COLLECTIONS, EPISODES, EXCEPTIONS, LINKS,
    MODELS, NODES, NOTES, OPTIONAL_COLLECTIONS, PROXIES, PROXY_READINGS, VARIABLES,
};
use crate::model::document::{
    ActionStatus, Cadence, Decision, Enforcement, EpisodeStatus, EpisodeType, LinkRelation,
    ModelType, NodeType, ProxyValueType, VariableStatus,
};
use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Why a payload is not an instance of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NotAnObject,
    VersionMismatch {
        expected: Option<u32>,
        found: Option<String>,
    },
    MissingCollection(&'static str),
    CollectionNotArray(&'static str),
    UnexpectedCollection(&'static str),
    DuplicateId {
        collection: &'static str,
        id: String,
    },
    InvalidEntry {
        collection: &'static str,
        index: usize,
        field: &'static str,
        reason: String,
    },
    /// Optional field present in a version that does not know it.
    IllegalField {
        collection: &'static str,
        index: usize,
        field: &'static str,
    },
    DanglingReference {
        collection: &'static str,
        id: String,
        field: &'static str,
        target: String,
    },
    SelfReferentialPartOf {
        link_id: String,
    },
    PartOfCycle {
        link_id: String,
        source_id: String,
        target_id: String,
    },
    ReadingTypeMismatch {
        reading_id: String,
        expected: String,
        found: String,
    },
}

impl ValidationError {
    /// Whether the payload is well-typed but breaks cross-entity integrity.
    pub fn is_referential(&self) -> bool {
        matches!(
            self,
            Self::DanglingReference { .. }
                | Self::SelfReferentialPartOf { .. }
                | Self::PartOfCycle { .. }
                | Self::ReadingTypeMismatch { .. }
        )
    }

    /// Stable machine-readable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::MissingCollection(_) => "missing_collection",
            Self::CollectionNotArray(_) => "collection_not_array",
            Self::UnexpectedCollection(_) => "unexpected_collection",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::InvalidEntry { .. } => "invalid_entry",
            Self::IllegalField { .. } => "illegal_field",
            Self::DanglingReference { .. } => "dangling_reference",
            Self::SelfReferentialPartOf { .. } => "part_of_self_reference",
            Self::PartOfCycle { .. } => "part_of_cycle",
            Self::ReadingTypeMismatch { .. } => "reading_type_mismatch",
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "document must be a JSON object"),
            Self::VersionMismatch { expected, found } => {
                let expected = expected.map_or("<absent>".to_string(), |v| v.to_string());
                let found = found.as_deref().unwrap_or("<absent>");
                write!(f, "schemaVersion {found} does not match expected {expected}")
            }
            Self::MissingCollection(name) => write!(f, "collection `{name}` is missing"),
            Self::CollectionNotArray(name) => write!(f, "collection `{name}` must be an array"),
            Self::UnexpectedCollection(name) => {
                write!(f, "collection `{name}` is not part of this schema version")
            }
            Self::DuplicateId { collection, id } => {
                write!(f, "duplicate id `{id}` in `{collection}`")
            }
            Self::InvalidEntry {
                collection,
                index,
                field,
                reason,
            } => write!(f, "{collection}[{index}].{field}: {reason}"),
            Self::IllegalField {
                collection,
                index,
                field,
            } => write!(
                f,
                "{collection}[{index}].{field} is not allowed in this schema version"
            ),
            Self::DanglingReference {
                collection,
                id,
                field,
                target,
            } => write!(
                f,
                "{collection} `{id}` field `{field}` references missing id `{target}`"
            ),
            Self::SelfReferentialPartOf { link_id } => {
                write!(f, "part_of link `{link_id}` points at itself")
            }
            Self::PartOfCycle {
                link_id,
                source_id,
                target_id,
            } => write!(
                f,
                "part_of link `{link_id}` ({source_id} -> {target_id}) would create a cycle"
            ),
            Self::ReadingTypeMismatch {
                reading_id,
                expected,
                found,
            } => write!(
                f,
                "proxy reading `{reading_id}` carries {found} value for {expected} proxy"
            ),
        }
    }
}

impl Error for ValidationError {}

/// Boolean form of [`validate`].
pub fn is_valid(payload: &Value, descriptor: &SchemaDescriptor) -> bool {
    validate(payload, descriptor).is_ok()
}

/// Validates `payload` against one descriptor.
pub fn validate(payload: &Value, descriptor: &SchemaDescriptor) -> Result<(), ValidationError> {
    let root = payload.as_object().ok_or(ValidationError::NotAnObject)?;
    check_version_tag(root, descriptor)?;
    check_collection_shape(root, descriptor)?;
    check_unique_ids(root, descriptor)?;

    let node_ids = check_collection(root, NODES, check_node)?;
    let variable_ids = check_collection(root, VARIABLES, |entry| {
        check_variable(entry, descriptor)
    })?;
    let episode_ids = check_collection(root, EPISODES, |entry| check_episode(entry, descriptor))?;
    let actions = check_collection(root, ACTIONS, check_action)?;
    let note_ids = check_collection(root, NOTES, |entry| check_note(entry, descriptor))?;
    let model_ids = check_collection(root, MODELS, |entry| check_model(entry, descriptor))?;
    let links = check_collection(root, LINKS, |entry| check_link(entry, descriptor))?;
    let exceptions = check_collection(root, EXCEPTIONS, check_exception)?;
    let proxies = check_collection(root, PROXIES, check_proxy)?;
    let readings = check_collection(root, PROXY_READINGS, check_reading)?;

    let episodes: HashSet<&str> = episode_ids.iter().copied().collect();
    for action in &actions {
        if let Some(episode_id) = action.episode_id {
            require_target(ACTIONS, action.id, "episodeId", episode_id, &episodes)?;
        }
    }

    let models: HashSet<&str> = model_ids.iter().copied().collect();
    for exception in &exceptions {
        require_target(EXCEPTIONS, exception.id, "modelId", exception.model_id, &models)?;
    }

    let variables: HashSet<&str> = variable_ids.iter().copied().collect();
    for proxy in &proxies {
        require_target(PROXIES, proxy.id, "variableId", proxy.variable_id, &variables)?;
    }

    let proxy_types: HashMap<&str, &str> = proxies
        .iter()
        .map(|proxy| (proxy.id, proxy.value_type))
        .collect();
    for reading in &readings {
        let Some(expected) = proxy_types.get(reading.proxy_id) else {
            return Err(dangling(PROXY_READINGS, reading.id, "proxyId", reading.proxy_id));
        };
        if *expected != reading.value_type {
            return Err(ValidationError::ReadingTypeMismatch {
                reading_id: reading.id.to_string(),
                expected: (*expected).to_string(),
                found: reading.value_type.to_string(),
            });
        }
    }

    let universe: HashSet<&str> = node_ids
        .iter()
        .chain(variable_ids.iter())
        .chain(episode_ids.iter())
        .chain(actions.iter().map(|action| &action.id))
        .chain(note_ids.iter())
        .chain(model_ids.iter())
        .chain(exceptions.iter().map(|exception| &exception.id))
        .chain(proxies.iter().map(|proxy| &proxy.id))
        .chain(readings.iter().map(|reading| &reading.id))
        .copied()
        .collect();
    let mut part_of = PartOfGraph::default();
    for link in &links {
        require_target(LINKS, link.id, "sourceId", link.source_id, &universe)?;
        require_target(LINKS, link.id, "targetId", link.target_id, &universe)?;
        if link.part_of {
            part_of.admit(link)?;
        }
    }

    Ok(())
}

fn check_version_tag(
    root: &Map<String, Value>,
    descriptor: &SchemaDescriptor,
) -> Result<(), ValidationError> {
    let found = root.get(SCHEMA_VERSION_KEY);
    match (descriptor.version, found) {
        (None, None) => Ok(()),
        (Some(expected), Some(value)) if value.as_u64() == Some(u64::from(expected)) => Ok(()),
        (expected, found) => Err(ValidationError::VersionMismatch {
            expected,
            found: found.map(Value::to_string),
        }),
    }
}

fn check_collection_shape(
    root: &Map<String, Value>,
    descriptor: &SchemaDescriptor,
) -> Result<(), ValidationError> {
    for name in BASE_COLLECTIONS.iter().chain(OPTIONAL_COLLECTIONS.iter()) {
        let required = descriptor.requires_collection(name);
        match (root.get(*name), required) {
            (Some(Value::Array(_)), true) | (None, false) => {}
            (Some(_), true) => return Err(ValidationError::CollectionNotArray(*name)),
            (None, true) => return Err(ValidationError::MissingCollection(*name)),
            (Some(_), false) => return Err(ValidationError::UnexpectedCollection(*name)),
        }
    }
    Ok(())
}

fn items<'a>(root: &'a Map<String, Value>, name: &str) -> &'a [Value] {
    root.get(name)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn check_unique_ids(
    root: &Map<String, Value>,
    descriptor: &SchemaDescriptor,
) -> Result<(), ValidationError> {
    for name in descriptor.required_collections() {
        let mut seen = HashSet::new();
        for id in items(root, name)
            .iter()
            .filter_map(|item| item.get("id").and_then(Value::as_str))
        {
            if !seen.insert(id) {
                return Err(ValidationError::DuplicateId {
                    collection: name,
                    id: id.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_collection<'a, T>(
    root: &'a Map<String, Value>,
    name: &'static str,
    check: impl Fn(&Entry<'a>) -> Result<T, ValidationError>,
) -> Result<Vec<T>, ValidationError> {
    items(root, name)
        .iter()
        .enumerate()
        .map(|(index, value)| check(&Entry::new(name, index, value)?))
        .collect()
}

fn require_target(
    collection: &'static str,
    id: &str,
    field: &'static str,
    target: &str,
    known: &HashSet<&str>,
) -> Result<(), ValidationError> {
    if known.contains(target) {
        Ok(())
    } else {
        Err(dangling(collection, id, field, target))
    }
}

fn dangling(
    collection: &'static str,
    id: &str,
    field: &'static str,
    target: &str,
) -> ValidationError {
    ValidationError::DanglingReference {
        collection,
        id: id.to_string(),
        field,
        target: target.to_string(),
    }
}

/// One collection element under inspection.
struct Entry<'a> {
    collection: &'static str,
    index: usize,
    fields: &'a Map<String, Value>,
}

impl<'a> Entry<'a> {
    fn new(
        collection: &'static str,
        index: usize,
        value: &'a Value,
    ) -> Result<Self, ValidationError> {
        match value.as_object() {
            Some(fields) => Ok(Self {
                collection,
                index,
                fields,
            }),
            None => Err(ValidationError::InvalidEntry {
                collection,
                index,
                field: "*",
                reason: "entry must be an object".to_string(),
            }),
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> ValidationError {
        ValidationError::InvalidEntry {
            collection: self.collection,
            index: self.index,
            field,
            reason: reason.into(),
        }
    }

    /// `null` counts as absent, matching how `Option` fields decode.
    fn present(&self, field: &'static str) -> Option<&'a Value> {
        self.fields.get(field).filter(|value| !value.is_null())
    }

    fn required(&self, field: &'static str) -> Result<&'a Value, ValidationError> {
        self.present(field)
            .ok_or_else(|| self.invalid(field, "required field is missing"))
    }

    fn optional(
        &self,
        field: &'static str,
        legal: bool,
    ) -> Result<Option<&'a Value>, ValidationError> {
        match self.present(field) {
            Some(_) if !legal => Err(ValidationError::IllegalField {
                collection: self.collection,
                index: self.index,
                field,
            }),
            other => Ok(other),
        }
    }

    fn id(&self) -> Result<&'a str, ValidationError> {
        self.non_empty(ID, self.required(ID)?)
    }

    fn text(&self, field: &'static str) -> Result<&'a str, ValidationError> {
        self.string(field, self.required(field)?)
    }

    fn reference(&self, field: &'static str) -> Result<&'a str, ValidationError> {
        self.non_empty(field, self.required(field)?)
    }

    fn choice(&self, field: &'static str, allowed: &[&str]) -> Result<&'a str, ValidationError> {
        self.one_of(field, self.required(field)?, allowed)
    }

    fn timestamp(&self, field: &'static str) -> Result<DateTime<FixedOffset>, ValidationError> {
        self.rfc3339(field, self.required(field)?)
    }

    fn string(&self, field: &'static str, value: &'a Value) -> Result<&'a str, ValidationError> {
        value
            .as_str()
            .ok_or_else(|| self.invalid(field, "expected a string"))
    }

    fn non_empty(&self, field: &'static str, value: &'a Value) -> Result<&'a str, ValidationError> {
        let text = self.string(field, value)?;
        if text.trim().is_empty() {
            return Err(self.invalid(field, "must not be empty"));
        }
        Ok(text)
    }

    fn one_of(
        &self,
        field: &'static str,
        value: &'a Value,
        allowed: &[&str],
    ) -> Result<&'a str, ValidationError> {
        let text = self.string(field, value)?;
        if allowed.contains(&text) {
            Ok(text)
        } else {
            Err(self.invalid(
                field,
                format!("`{text}` is not one of {}", allowed.join("|")),
            ))
        }
    }

    fn rfc3339(
        &self,
        field: &'static str,
        value: &'a Value,
    ) -> Result<DateTime<FixedOffset>, ValidationError> {
        let text = self.string(field, value)?;
        DateTime::parse_from_rfc3339(text)
            .map_err(|err| self.invalid(field, format!("invalid RFC 3339 timestamp: {err}")))
    }

    fn number(&self, field: &'static str, value: &Value) -> Result<f64, ValidationError> {
        value
            .as_f64()
            .ok_or_else(|| self.invalid(field, "expected a number"))
    }

    fn unit_interval(&self, field: &'static str, value: &Value) -> Result<f64, ValidationError> {
        let number = self.number(field, value)?;
        if (0.0..=1.0).contains(&number) {
            Ok(number)
        } else {
            Err(self.invalid(field, format!("{number} is outside [0, 1]")))
        }
    }

    fn string_list(
        &self,
        field: &'static str,
        value: &'a Value,
    ) -> Result<Vec<&'a str>, ValidationError> {
        let list = value
            .as_array()
            .ok_or_else(|| self.invalid(field, "expected an array of strings"))?;
        list.iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| self.invalid(field, "expected an array of strings"))
            })
            .collect()
    }
}

const ID: &str = "id";

fn check_node<'a>(entry: &Entry<'a>) -> Result<&'a str, ValidationError> {
    let id = entry.id()?;
    entry.choice("kind", NodeType::ALL)?;
    entry.text("name")?;
    entry.string_list("tags", entry.required("tags")?)?;
    Ok(id)
}

fn check_node_address(
    entry: &Entry<'_>,
    descriptor: &SchemaDescriptor,
) -> Result<(), ValidationError> {
    let node = entry.required("node")?;
    match descriptor.node_addressing {
        NodeAddressing::Bare => {
            entry.one_of("node", node, NodeType::ALL)?;
        }
        NodeAddressing::Ref => {
            let address = node
                .as_object()
                .ok_or_else(|| entry.invalid("node", "expected a {type, id} object"))?;
            let node_type = address
                .get("type")
                .ok_or_else(|| entry.invalid("node", "node.type is missing"))?;
            entry.one_of("node", node_type, NodeType::ALL)?;
            let node_id = address
                .get("id")
                .ok_or_else(|| entry.invalid("node", "node.id is missing"))?;
            entry.non_empty("node", node_id)?;
        }
    }
    Ok(())
}

fn check_variable<'a>(
    entry: &Entry<'a>,
    descriptor: &SchemaDescriptor,
) -> Result<&'a str, ValidationError> {
    let id = entry.id()?;
    check_node_address(entry, descriptor)?;
    entry.text("name")?;
    entry.choice("status", VariableStatus::ALL)?;
    if let Some(range) = entry.optional("range", descriptor.variable.range)? {
        let bounds = range
            .as_object()
            .ok_or_else(|| entry.invalid("range", "expected a {min, max} object"))?;
        let min = bounds
            .get("min")
            .ok_or_else(|| entry.invalid("range", "range.min is missing"))?;
        let max = bounds
            .get("max")
            .ok_or_else(|| entry.invalid("range", "range.max is missing"))?;
        let (min, max) = (entry.number("range", min)?, entry.number("range", max)?);
        if min > max {
            return Err(entry.invalid("range", format!("min {min} exceeds max {max}")));
        }
    }
    if let Some(cadence) = entry.optional("cadence", descriptor.variable.cadence)? {
        entry.one_of("cadence", cadence, Cadence::ALL)?;
    }
    Ok(id)
}

fn check_episode<'a>(
    entry: &Entry<'a>,
    descriptor: &SchemaDescriptor,
) -> Result<&'a str, ValidationError> {
    let id = entry.id()?;
    check_node_address(entry, descriptor)?;
    entry.choice("type", EpisodeType::ALL)?;
    entry.choice("status", EpisodeStatus::ALL)?;
    entry.text("objective")?;
    if let Some(variable_id) = entry.optional("variableId", descriptor.episode.variable_id)? {
        entry.non_empty("variableId", variable_id)?;
    }
    let opened_at = entry.timestamp("openedAt")?;
    if let Some(closed_at) = entry.optional("closedAt", true)? {
        let closed_at = entry.rfc3339("closedAt", closed_at)?;
        if closed_at < opened_at {
            return Err(entry.invalid("closedAt", "episode closes before it opens"));
        }
    }
    if let Some(timebox) = entry.optional("timebox", descriptor.episode.timebox)? {
        match timebox.as_u64() {
            Some(days) if days >= 1 && days <= u64::from(u32::MAX) => {}
            _ => return Err(entry.invalid("timebox", "expected a positive number of days")),
        }
    }
    Ok(id)
}

struct ActionFacts<'a> {
    id: &'a str,
    episode_id: Option<&'a str>,
}

fn check_action<'a>(entry: &Entry<'a>) -> Result<ActionFacts<'a>, ValidationError> {
    let id = entry.id()?;
    entry.text("description")?;
    entry.choice("status", ActionStatus::ALL)?;
    let episode_id = match entry.optional("episodeId", true)? {
        Some(value) => Some(entry.non_empty("episodeId", value)?),
        None => None,
    };
    Ok(ActionFacts { id, episode_id })
}

fn check_note<'a>(
    entry: &Entry<'a>,
    descriptor: &SchemaDescriptor,
) -> Result<&'a str, ValidationError> {
    let id = entry.id()?;
    entry.text("content")?;
    entry.timestamp("createdAt")?;
    entry.string_list("tags", entry.required("tags")?)?;
    if let Some(linked) = entry.optional("linkedObjects", descriptor.note.linked_objects)? {
        entry.string_list("linkedObjects", linked)?;
    }
    Ok(id)
}

fn check_model<'a>(
    entry: &Entry<'a>,
    descriptor: &SchemaDescriptor,
) -> Result<&'a str, ValidationError> {
    let id = entry.id()?;
    entry.choice("type", ModelType::ALL)?;
    entry.text("statement")?;
    if let Some(scope) = entry.optional("scope", descriptor.model.scope)? {
        entry.string("scope", scope)?;
    }
    if let Some(enforcement) = entry.optional("enforcement", descriptor.model.enforcement)? {
        entry.one_of("enforcement", enforcement, Enforcement::ALL)?;
    }
    if let Some(confidence) = entry.optional("confidence", descriptor.model.confidence)? {
        entry.unit_interval("confidence", confidence)?;
    }
    Ok(id)
}

struct LinkFacts<'a> {
    id: &'a str,
    source_id: &'a str,
    target_id: &'a str,
    part_of: bool,
}

fn check_link<'a>(
    entry: &Entry<'a>,
    descriptor: &SchemaDescriptor,
) -> Result<LinkFacts<'a>, ValidationError> {
    let id = entry.id()?;
    let source_id = entry.reference("sourceId")?;
    let target_id = entry.reference("targetId")?;
    let relation = entry.choice("relation", LinkRelation::ALL)?;
    if let Some(weight) = entry.optional("weight", descriptor.link.weight)? {
        entry.unit_interval("weight", weight)?;
    }
    Ok(LinkFacts {
        id,
        source_id,
        target_id,
        part_of: relation == LinkRelation::PART_OF,
    })
}

struct ExceptionFacts<'a> {
    id: &'a str,
    model_id: &'a str,
}

fn check_exception<'a>(entry: &Entry<'a>) -> Result<ExceptionFacts<'a>, ValidationError> {
    let id = entry.id()?;
    let model_id = entry.reference("modelId")?;
    entry.choice("originalDecision", Decision::ALL)?;
    entry.text("justification")?;
    entry.reference("mutationType")?;
    entry.reference("mutationId")?;
    entry.timestamp("createdAt")?;
    Ok(ExceptionFacts { id, model_id })
}

struct ProxyFacts<'a> {
    id: &'a str,
    variable_id: &'a str,
    value_type: &'a str,
}

fn check_proxy<'a>(entry: &Entry<'a>) -> Result<ProxyFacts<'a>, ValidationError> {
    let id = entry.id()?;
    let variable_id = entry.reference("variableId")?;
    entry.text("name")?;
    let value_type = entry.choice("valueType", ProxyValueType::ALL)?;
    if let Some(thresholds) = entry.optional("thresholds", value_type == "numeric")? {
        let bounds = thresholds
            .as_object()
            .ok_or_else(|| entry.invalid("thresholds", "expected a {low, high} object"))?;
        let low = bounds
            .get("low")
            .filter(|value| !value.is_null())
            .map(|value| entry.number("thresholds", value))
            .transpose()?;
        let high = bounds
            .get("high")
            .filter(|value| !value.is_null())
            .map(|value| entry.number("thresholds", value))
            .transpose()?;
        if let (Some(low), Some(high)) = (low, high) {
            if low > high {
                return Err(entry.invalid("thresholds", format!("low {low} exceeds high {high}")));
            }
        }
    }
    if let Some(categories) = entry.optional("categories", value_type == "categorical")? {
        entry.string_list("categories", categories)?;
    }
    Ok(ProxyFacts {
        id,
        variable_id,
        value_type,
    })
}

struct ReadingFacts<'a> {
    id: &'a str,
    proxy_id: &'a str,
    value_type: &'a str,
}

fn check_reading<'a>(entry: &Entry<'a>) -> Result<ReadingFacts<'a>, ValidationError> {
    let id = entry.id()?;
    let proxy_id = entry.reference("proxyId")?;
    let value = entry
        .required("value")?
        .as_object()
        .ok_or_else(|| entry.invalid("value", "expected a {type, value} object"))?;
    let tag = value
        .get("type")
        .ok_or_else(|| entry.invalid("value", "value.type is missing"))?;
    let value_type = entry.one_of("value", tag, ProxyValueType::ALL)?;
    let inner = value
        .get("value")
        .ok_or_else(|| entry.invalid("value", "value.value is missing"))?;
    let well_typed = match value_type {
        "numeric" => inner.is_number(),
        "boolean" => inner.is_boolean(),
        _ => inner.is_string(),
    };
    if !well_typed {
        return Err(entry.invalid("value", format!("value does not match tag `{value_type}`")));
    }
    entry.timestamp("recordedAt")?;
    Ok(ReadingFacts {
        id,
        proxy_id,
        value_type,
    })
}

/// `part_of` edges admitted so far, keyed child -> parents.
#[derive(Default)]
struct PartOfGraph<'a> {
    parents: HashMap<&'a str, Vec<&'a str>>,
}

impl<'a> PartOfGraph<'a> {
    fn admit(&mut self, link: &LinkFacts<'a>) -> Result<(), ValidationError> {
        if link.source_id == link.target_id {
            return Err(ValidationError::SelfReferentialPartOf {
                link_id: link.id.to_string(),
            });
        }
        if self.reaches(link.target_id, link.source_id) {
            return Err(ValidationError::PartOfCycle {
                link_id: link.id.to_string(),
                source_id: link.source_id.to_string(),
                target_id: link.target_id.to_string(),
            });
        }
        self.parents
            .entry(link.source_id)
            .or_default()
            .push(link.target_id);
        Ok(())
    }

    /// Whether `goal` is `start` or one of its ancestors.
    fn reaches(&self, start: &'a str, goal: &str) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![start];
        while let Some(current) = pending.pop() {
            if current == goal {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                pending.extend(parents.iter().copied());
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::{is_valid, validate, ValidationError};
    use crate::schema::descriptor::{current, descriptors};
    use serde_json::json;

    fn minimal_current() -> serde_json::Value {
        json!({
            "schemaVersion": 13,
            "nodes": [], "variables": [], "episodes": [], "actions": [], "notes": [],
            "models": [], "links": [], "exceptions": [], "proxies": [], "proxyReadings": []
        })
    }

    #[test]
    fn empty_current_document_is_valid() {
        assert!(is_valid(&minimal_current(), current()));
    }

    #[test]
    fn legacy_descriptor_rejects_version_tag() {
        let payload = json!({
            "schemaVersion": 1,
            "variables": [], "episodes": [], "actions": [], "notes": [], "models": []
        });
        let err = validate(&payload, &descriptors()[0]).unwrap_err();
        assert_eq!(err.code(), "version_mismatch");
        assert!(is_valid(&payload, &descriptors()[1]));
    }

    #[test]
    fn rejects_non_object_and_missing_collection() {
        assert_eq!(
            validate(&json!([1, 2]), current()).unwrap_err(),
            ValidationError::NotAnObject
        );
        let mut payload = minimal_current();
        payload.as_object_mut().unwrap().remove("proxies");
        assert_eq!(
            validate(&payload, current()).unwrap_err(),
            ValidationError::MissingCollection("proxies")
        );
    }

    #[test]
    fn rejects_collection_unknown_to_version() {
        let payload = json!({
            "schemaVersion": 7,
            "nodes": [], "variables": [], "episodes": [], "actions": [], "notes": [],
            "models": [], "links": []
        });
        assert_eq!(
            validate(&payload, &descriptors()[7]).unwrap_err(),
            ValidationError::UnexpectedCollection("links")
        );
    }

    #[test]
    fn referential_errors_are_classified() {
        let mut payload = minimal_current();
        payload["actions"] = json!([
            {"id": "a1", "description": "call", "status": "Pending", "episodeId": "missing"}
        ]);
        let err = validate(&payload, current()).unwrap_err();
        assert!(err.is_referential(), "unexpected error: {err}");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn diamond_part_of_graph_is_not_a_cycle() {
        let mut payload = minimal_current();
        payload["notes"] = json!([
            {"id": "a", "content": "", "createdAt": "2024-01-01T00:00:00Z", "tags": []},
            {"id": "b", "content": "", "createdAt": "2024-01-01T00:00:00Z", "tags": []},
            {"id": "c", "content": "", "createdAt": "2024-01-01T00:00:00Z", "tags": []},
            {"id": "d", "content": "", "createdAt": "2024-01-01T00:00:00Z", "tags": []}
        ]);
        payload["links"] = json!([
            {"id": "l1", "sourceId": "a", "targetId": "b", "relation": "part_of"},
            {"id": "l2", "sourceId": "a", "targetId": "c", "relation": "part_of"},
            {"id": "l3", "sourceId": "b", "targetId": "d", "relation": "part_of"},
            {"id": "l4", "sourceId": "c", "targetId": "d", "relation": "part_of"},
            {"id": "l5", "sourceId": "d", "targetId": "a", "relation": "informs"}
        ]);
        assert_eq!(validate(&payload, current()), Ok(()));
    }
}
