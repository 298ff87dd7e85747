//! Declarative descriptors for every historical document shape.
//!
//! # Responsibility
//! - Describe, as plain data, which collections and optional fields each
//!   schema version admits.
//!
//! # Invariants
//! - `DESCRIPTORS` is ordered oldest to newest and `DESCRIPTORS[i].level() == i`.
//! - Each descriptor only ever widens its predecessor.

/// Version tag written by the current code.
pub const SCHEMA_VERSION: u32 = 13;

/// How variables and episodes address the node they belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAddressing {
    /// `node` is a bare `NodeType` string.
    Bare,
    /// `node` is a `{ type, id }` object.
    Ref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableFields {
    pub range: bool,
    pub cadence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeFields {
    pub variable_id: bool,
    pub timebox: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteFields {
    pub linked_objects: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelFields {
    pub scope: bool,
    pub enforcement: bool,
    pub confidence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkFields {
    pub weight: bool,
}

/// Legal shape of one schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaDescriptor {
    /// `None` for the legacy shape that carries no `schemaVersion` key.
    pub version: Option<u32>,
    pub node_addressing: NodeAddressing,
    pub has_nodes: bool,
    pub has_links: bool,
    pub has_exceptions: bool,
    pub has_proxies: bool,
    pub has_proxy_readings: bool,
    pub variable: VariableFields,
    pub episode: EpisodeFields,
    pub note: NoteFields,
    pub model: ModelFields,
    pub link: LinkFields,
}

pub const NODES: &str = "nodes";
pub const VARIABLES: &str = "variables";
pub const EPISODES: &str = "episodes";
pub const ACTIONS: &str = "actions";
pub const NOTES: &str = "notes";
pub const MODELS: &str = "models";
pub const LINKS: &str = "links";
pub const EXCEPTIONS: &str = "exceptions";
pub const PROXIES: &str = "proxies";
pub const PROXY_READINGS: &str = "proxyReadings";

/// Collections every version carries.
pub const BASE_COLLECTIONS: &[&str] = &[VARIABLES, EPISODES, ACTIONS, NOTES, MODELS];

/// Collections that appear at some version boundary.
pub const OPTIONAL_COLLECTIONS: &[&str] = &[NODES, LINKS, EXCEPTIONS, PROXIES, PROXY_READINGS];

impl SchemaDescriptor {
    /// Position of this descriptor in `DESCRIPTORS`; the legacy shape is level 0.
    pub fn level(&self) -> usize {
        self.version.map_or(0, |version| version as usize)
    }

    /// Whether the optional top-level collection `name` must exist.
    pub fn requires_collection(&self, name: &str) -> bool {
        match name {
            NODES => self.has_nodes,
            LINKS => self.has_links,
            EXCEPTIONS => self.has_exceptions,
            PROXIES => self.has_proxies,
            PROXY_READINGS => self.has_proxy_readings,
            other => BASE_COLLECTIONS.contains(&other),
        }
    }

    /// Every collection this version requires, in validation order.
    pub fn required_collections(&self) -> Vec<&'static str> {
        BASE_COLLECTIONS
            .iter()
            .chain(OPTIONAL_COLLECTIONS.iter())
            .copied()
            .filter(|name| self.requires_collection(name))
            .collect()
    }

    pub fn is_current(&self) -> bool {
        self.version == Some(SCHEMA_VERSION)
    }
}

const LEGACY: SchemaDescriptor = SchemaDescriptor {
    version: None,
    node_addressing: NodeAddressing::Bare,
    has_nodes: false,
    has_links: false,
    has_exceptions: false,
    has_proxies: false,
    has_proxy_readings: false,
    variable: VariableFields {
        range: false,
        cadence: false,
    },
    episode: EpisodeFields {
        variable_id: false,
        timebox: false,
    },
    note: NoteFields {
        linked_objects: false,
    },
    model: ModelFields {
        scope: false,
        enforcement: false,
        confidence: false,
    },
    link: LinkFields { weight: false },
};

const V1: SchemaDescriptor = SchemaDescriptor {
    version: Some(1),
    ..LEGACY
};

const V2: SchemaDescriptor = SchemaDescriptor {
    version: Some(2),
    episode: EpisodeFields {
        variable_id: true,
        ..V1.episode
    },
    ..V1
};

const V3: SchemaDescriptor = SchemaDescriptor {
    version: Some(3),
    variable: VariableFields {
        range: true,
        ..V2.variable
    },
    ..V2
};

const V4: SchemaDescriptor = SchemaDescriptor {
    version: Some(4),
    note: NoteFields {
        linked_objects: true,
    },
    ..V3
};

const V5: SchemaDescriptor = SchemaDescriptor {
    version: Some(5),
    model: ModelFields {
        scope: true,
        enforcement: true,
        confidence: true,
    },
    ..V4
};

const V6: SchemaDescriptor = SchemaDescriptor {
    version: Some(6),
    episode: EpisodeFields {
        timebox: true,
        ..V5.episode
    },
    ..V5
};

const V7: SchemaDescriptor = SchemaDescriptor {
    version: Some(7),
    node_addressing: NodeAddressing::Ref,
    has_nodes: true,
    ..V6
};

const V8: SchemaDescriptor = SchemaDescriptor {
    version: Some(8),
    has_links: true,
    ..V7
};

const V9: SchemaDescriptor = SchemaDescriptor {
    version: Some(9),
    link: LinkFields { weight: true },
    ..V8
};

const V10: SchemaDescriptor = SchemaDescriptor {
    version: Some(10),
    has_exceptions: true,
    ..V9
};

const V11: SchemaDescriptor = SchemaDescriptor {
    version: Some(11),
    has_proxies: true,
    ..V10
};

const V12: SchemaDescriptor = SchemaDescriptor {
    version: Some(12),
    has_proxy_readings: true,
    ..V11
};

const V13: SchemaDescriptor = SchemaDescriptor {
    version: Some(13),
    variable: VariableFields {
        cadence: true,
        ..V12.variable
    },
    ..V12
};

/// All known shapes, oldest first.
pub const DESCRIPTORS: &[SchemaDescriptor] = &[
    LEGACY, V1, V2, V3, V4, V5, V6, V7, V8, V9, V10, V11, V12, V13,
];

pub fn descriptors() -> &'static [SchemaDescriptor] {
    DESCRIPTORS
}

/// Descriptor for `SCHEMA_VERSION`.
pub fn current() -> &'static SchemaDescriptor {
    &DESCRIPTORS[DESCRIPTORS.len() - 1]
}

pub fn descriptor_for(level: usize) -> Option<&'static SchemaDescriptor> {
    DESCRIPTORS.get(level)
}

#[cfg(test)]
mod tests {
    use super::{current, descriptors, NodeAddressing, LINKS, NODES, SCHEMA_VERSION, VARIABLES};

    #[test]
    fn levels_match_positions() {
        for (index, descriptor) in descriptors().iter().enumerate() {
            assert_eq!(descriptor.level(), index);
        }
        assert_eq!(current().version, Some(SCHEMA_VERSION));
        assert!(current().is_current());
    }

    #[test]
    fn each_descriptor_widens_its_predecessor() {
        for pair in descriptors().windows(2) {
            let (older, newer) = (&pair[0], &pair[1]);
            for name in older.required_collections() {
                assert!(newer.requires_collection(name), "{name} dropped");
            }
            assert!(!older.variable.range || newer.variable.range);
            assert!(!older.episode.variable_id || newer.episode.variable_id);
            assert!(!older.episode.timebox || newer.episode.timebox);
            assert!(!older.note.linked_objects || newer.note.linked_objects);
            assert!(!older.model.confidence || newer.model.confidence);
            assert!(!older.link.weight || newer.link.weight);
        }
    }

    #[test]
    fn legacy_shape_has_only_base_collections() {
        let legacy = &descriptors()[0];
        assert_eq!(legacy.version, None);
        assert_eq!(legacy.node_addressing, NodeAddressing::Bare);
        assert!(legacy.requires_collection(VARIABLES));
        assert!(!legacy.requires_collection(NODES));
        assert!(!legacy.requires_collection(LINKS));
        assert_eq!(legacy.required_collections().len(), 5);
        assert_eq!(current().required_collections().len(), 10);
    }
}
