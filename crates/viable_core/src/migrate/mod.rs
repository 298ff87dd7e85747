//! Forward migration registry and dispatcher.
//!
//! # Responsibility
//! - Register one pure step per schema boundary in strictly increasing order.
//! - Detect the source version of a raw payload and apply exactly the
//!   suffix of steps that brings it to `SCHEMA_VERSION`.
//!
//! # Invariants
//! - `MIGRATIONS[i].from == i`; step `i` turns a valid level-`i` payload
//!   into a valid level-`i + 1` payload.
//! - Steps only add defaults for what their target version introduces and
//!   carry every other field unchanged.
//! - There is no best-effort path: a payload no descriptor accepts is
//!   rejected as a whole.

use crate::model::document::{Document, NodeType};
use crate::schema::descriptor::{
    self, EPISODES, EXCEPTIONS, LINKS, NODES, PROXIES, PROXY_READINGS, SCHEMA_VERSION, VARIABLES,
};
use crate::schema::validate::{validate, ValidationError};
use log::{debug, error};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Level the step starts from; the legacy shape is level 0.
    pub from: usize,
    pub summary: &'static str,
    apply: fn(Payload) -> Payload,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 0,
        summary: "tag legacy document with an explicit schemaVersion",
        apply: carry_forward,
    },
    Migration {
        from: 1,
        summary: "episodes may reference a variable",
        apply: carry_forward,
    },
    Migration {
        from: 2,
        summary: "variables may carry a range",
        apply: carry_forward,
    },
    Migration {
        from: 3,
        summary: "notes may link to other objects",
        apply: carry_forward,
    },
    Migration {
        from: 4,
        summary: "models may carry scope, enforcement and confidence",
        apply: carry_forward,
    },
    Migration {
        from: 5,
        summary: "episodes may carry a timebox",
        apply: carry_forward,
    },
    Migration {
        from: 6,
        summary: "address nodes by {type, id} and add the nodes collection",
        apply: introduce_node_refs,
    },
    Migration {
        from: 7,
        summary: "add the links collection",
        apply: add_links,
    },
    Migration {
        from: 8,
        summary: "links may carry a weight",
        apply: carry_forward,
    },
    Migration {
        from: 9,
        summary: "add the exceptions collection",
        apply: add_exceptions,
    },
    Migration {
        from: 10,
        summary: "add the proxies collection",
        apply: add_proxies,
    },
    Migration {
        from: 11,
        summary: "add the proxyReadings collection",
        apply: add_proxy_readings,
    },
    Migration {
        from: 12,
        summary: "variables may carry a cadence",
        apply: carry_forward,
    },
];

/// Returns the registered steps, oldest first.
pub fn migrations() -> &'static [Migration] {
    MIGRATIONS
}

/// Level of the newest descriptor.
pub fn current_level() -> usize {
    MIGRATIONS.len()
}

/// Result of bringing a payload up to the current version.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub from_level: usize,
    pub document: Document,
}

impl Migrated {
    pub fn was_migrated(&self) -> bool {
        self.from_level != current_level()
    }
}

#[derive(Debug)]
pub enum MigrateError {
    /// No descriptor accepts the payload. Carries the most specific rejection.
    NoMatchingSchema(ValidationError),
    /// A step produced a payload the next version rejects.
    Defect {
        from_level: usize,
        error: ValidationError,
    },
    /// The current validator accepted a payload the typed model cannot decode.
    Decode(serde_json::Error),
}

impl MigrateError {
    pub fn is_referential(&self) -> bool {
        matches!(self, Self::NoMatchingSchema(err) if err.is_referential())
    }

    /// Whether the failure points at a bug in this crate rather than bad input.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Defect { .. } | Self::Decode(_))
    }
}

impl Display for MigrateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatchingSchema(err) => write!(f, "document matches no known schema: {err}"),
            Self::Defect { from_level, error } => write!(
                f,
                "migration from level {from_level} produced an invalid document: {error}"
            ),
            Self::Decode(err) => write!(f, "validated document failed to decode: {err}"),
        }
    }
}

impl Error for MigrateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoMatchingSchema(err) => Some(err),
            Self::Defect { error, .. } => Some(error),
            Self::Decode(err) => Some(err),
        }
    }
}

/// Finds the level of the newest descriptor that accepts `payload`.
///
/// Descriptors are tried newest first. When none matches, the returned
/// error is the first rejection that got past the version tag, so callers
/// see why the payload failed its own declared version.
pub fn detect_level(payload: &Value) -> Result<usize, MigrateError> {
    let mut rejection: Option<ValidationError> = None;
    for candidate in descriptor::descriptors().iter().rev() {
        match validate(payload, candidate) {
            Ok(()) => return Ok(candidate.level()),
            Err(err) => {
                debug!(
                    "event=schema_probe module=migrate status=rejected level={} code={}",
                    candidate.level(),
                    err.code()
                );
                let keep = match &rejection {
                    None => true,
                    Some(ValidationError::VersionMismatch { .. }) => {
                        !matches!(err, ValidationError::VersionMismatch { .. })
                    }
                    Some(_) => false,
                };
                if keep {
                    rejection = Some(err);
                }
            }
        }
    }
    Err(MigrateError::NoMatchingSchema(
        rejection.unwrap_or(ValidationError::NotAnObject),
    ))
}

/// Detects the source version, applies the remaining steps and decodes the
/// result into a typed `Document`.
pub fn migrate_to_current(payload: Value) -> Result<Migrated, MigrateError> {
    let from_level = detect_level(&payload)?;
    let Value::Object(mut map) = payload else {
        return Err(MigrateError::NoMatchingSchema(ValidationError::NotAnObject));
    };

    for step in &MIGRATIONS[from_level..] {
        map = (step.apply)(map);
        map.insert(
            "schemaVersion".to_string(),
            Value::from(step.from as u64 + 1),
        );
        debug!(
            "event=migration_step module=migrate status=ok from={} to={} summary=\"{}\"",
            step.from,
            step.from + 1,
            step.summary
        );
    }

    let migrated = Value::Object(map);
    let verdict = validate(&migrated, descriptor::current());
    debug_assert!(
        verdict.is_ok(),
        "migration from level {from_level} is not total: {verdict:?}"
    );
    if let Err(err) = verdict {
        error!(
            "event=migration_defect module=migrate status=error from={} code={} error={}",
            from_level,
            err.code(),
            err
        );
        return Err(MigrateError::Defect {
            from_level,
            error: err,
        });
    }

    let document: Document = serde_json::from_value(migrated).map_err(MigrateError::Decode)?;
    debug_assert_eq!(document.schema_version, SCHEMA_VERSION);
    Ok(Migrated {
        from_level,
        document,
    })
}

fn carry_forward(payload: Payload) -> Payload {
    payload
}

fn with_empty_collection(mut payload: Payload, name: &str) -> Payload {
    payload.insert(name.to_string(), Value::Array(Vec::new()));
    payload
}

fn add_links(payload: Payload) -> Payload {
    with_empty_collection(payload, LINKS)
}

fn add_exceptions(payload: Payload) -> Payload {
    with_empty_collection(payload, EXCEPTIONS)
}

fn add_proxies(payload: Payload) -> Payload {
    with_empty_collection(payload, PROXIES)
}

fn add_proxy_readings(payload: Payload) -> Payload {
    with_empty_collection(payload, PROXY_READINGS)
}

/// Rewrites bare `node` strings as `{type, id}` refs and creates one node per
/// type encountered, in first-seen order.
fn introduce_node_refs(mut payload: Payload) -> Payload {
    let mut seen: Vec<NodeType> = Vec::new();
    for collection in [VARIABLES, EPISODES] {
        let Some(Value::Array(items)) = payload.get_mut(collection) else {
            continue;
        };
        for item in items.iter_mut() {
            let Some(fields) = item.as_object_mut() else {
                continue;
            };
            let Some(node_type) = fields
                .get("node")
                .cloned()
                .and_then(|value| serde_json::from_value::<NodeType>(value).ok())
            else {
                continue;
            };
            if !seen.contains(&node_type) {
                seen.push(node_type);
            }
            fields.insert(
                "node".to_string(),
                json!({ "type": node_type, "id": node_type.default_node_id() }),
            );
        }
    }

    let nodes = seen
        .into_iter()
        .map(|node_type| {
            json!({
                "id": node_type.default_node_id(),
                "kind": node_type,
                "name": node_type,
                "tags": [],
            })
        })
        .collect();
    payload.insert(NODES.to_string(), Value::Array(nodes));
    payload
}

#[cfg(test)]
mod tests {
    use super::{current_level, detect_level, migrate_to_current, migrations, MigrateError};
    use crate::schema::descriptor::{descriptors, SCHEMA_VERSION};
    use serde_json::json;

    #[test]
    fn registry_covers_every_boundary_in_order() {
        for (index, step) in migrations().iter().enumerate() {
            assert_eq!(step.from, index);
        }
        assert_eq!(current_level() + 1, descriptors().len());
        assert_eq!(current_level(), SCHEMA_VERSION as usize);
    }

    #[test]
    fn detects_legacy_payload() {
        let payload = json!({
            "variables": [], "episodes": [], "actions": [], "notes": [], "models": []
        });
        assert_eq!(detect_level(&payload).unwrap(), 0);
    }

    #[test]
    fn future_version_matches_nothing() {
        let payload = json!({
            "schemaVersion": 99,
            "variables": [], "episodes": [], "actions": [], "notes": [], "models": []
        });
        let err = detect_level(&payload).unwrap_err();
        match err {
            MigrateError::NoMatchingSchema(inner) => assert_eq!(inner.code(), "version_mismatch"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejection_reports_failure_under_declared_version() {
        let payload = json!({
            "schemaVersion": 2,
            "variables": [{"id": "v1", "node": "Personal", "name": "Sleep", "status": "Sideways"}],
            "episodes": [], "actions": [], "notes": [], "models": []
        });
        let err = migrate_to_current(payload).unwrap_err();
        assert!(!err.is_defect());
        assert!(err.to_string().contains("Sideways"), "unexpected error: {err}");
    }

    #[test]
    fn node_refs_get_default_nodes() {
        let payload = json!({
            "schemaVersion": 6,
            "variables": [
                {"id": "v1", "node": "Org", "name": "Runway", "status": "Low"},
                {"id": "v2", "node": "Personal", "name": "Sleep", "status": "InRange"}
            ],
            "episodes": [], "actions": [], "notes": [], "models": []
        });
        let migrated = migrate_to_current(payload).unwrap();
        assert_eq!(migrated.from_level, 6);
        let ids: Vec<&str> = migrated
            .document
            .nodes
            .iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(ids, vec!["org", "personal"]);
        assert_eq!(migrated.document.variables[0].node.id, "org");
    }
}
