//! Default document used when no trustworthy state exists.

use crate::model::document::{Document, NodeRef, NodeType, Variable, VariableStatus};
use crate::schema::descriptor::SCHEMA_VERSION;

pub const SEED_VARIABLES: &[(&str, &str)] =
    &[("var-agency", "Agency"), ("var-continuity", "Continuity")];

/// Current-version document with the two baseline variables, both in range
/// on the personal node. Every other collection is empty.
pub fn seed_document() -> Document {
    let mut document = Document::empty(SCHEMA_VERSION);
    document.variables = SEED_VARIABLES
        .iter()
        .map(|(id, name)| Variable {
            id: (*id).to_string(),
            node: NodeRef::new(NodeType::Personal, NodeType::Personal.default_node_id()),
            name: (*name).to_string(),
            status: VariableStatus::InRange,
            range: None,
            cadence: None,
        })
        .collect();
    document
}

#[cfg(test)]
mod tests {
    use super::seed_document;
    use crate::model::document::VariableStatus;
    use crate::schema::validate_document;

    #[test]
    fn seed_is_valid_and_minimal() {
        let seed = seed_document();
        validate_document(&seed).unwrap();
        assert_eq!(seed.variables.len(), 2);
        assert!(seed
            .variables
            .iter()
            .all(|variable| variable.status == VariableStatus::InRange));
        assert_eq!(seed.entity_count(), 2);
    }
}
