//! Compiled YANG schema graph
//!
//! The graph is an arena: modules and schema nodes live in two vectors and refer
//! to each other by index. Augmentation is a plain relation, a node contributed
//! by module B under a node of module A keeps `module == B` and is listed among
//! its parent's children. The graph is never mutated after loading.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RpError};
use crate::location_id::LocationId;

/// Index of a module in a [`SchemaGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

impl ModuleId {
    /// Position in the module table
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a schema node in a [`SchemaGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position in the node arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kind of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Container,
    List,
    Leaf,
}

/// A namespace-scoped unit of schema definitions
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    revision: Option<String>,
    top_level: Vec<NodeId>,
}

impl Module {
    /// Module name, used as the namespace qualifier in addresses
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Revision date, if declared
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Top-level data nodes defined by this module
    pub fn top_level(&self) -> &[NodeId] {
        &self.top_level
    }
}

/// A node of the schema tree
#[derive(Debug, Clone)]
pub struct SchemaNode {
    name: String,
    kind: NodeKind,
    module: ModuleId,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    keys: Vec<String>,
}

impl SchemaNode {
    /// Node name without module prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container, list or leaf
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Module that contributed this node (the augmenting module for augments)
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Structural parent; `None` for top-level nodes
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children, including nodes contributed by augmenting modules
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Declared key leaf names, in declaration order (lists only)
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Check if the node is a list
    pub fn is_list(&self) -> bool {
        self.kind == NodeKind::List
    }
}

/// Immutable graph of loaded modules and their schema nodes
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    modules: Vec<Module>,
    nodes: Vec<SchemaNode>,
}

/// Raw schema description for deserialization
#[derive(Debug, Deserialize)]
struct RawSchema {
    modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    name: String,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    nodes: Vec<RawNode>,
    #[serde(default)]
    augments: Vec<RawAugment>,
}

#[derive(Debug, Deserialize)]
struct RawNode {
    name: String,
    kind: NodeKind,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    children: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawAugment {
    target: String,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

impl SchemaGraph {
    /// Load a schema description from the given path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// Load a schema description from a JSON string
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawSchema = serde_json::from_str(content)?;
        let mut graph = SchemaGraph::default();

        for module in &raw.modules {
            if graph.find_module(&module.name).is_some() {
                return Err(RpError::InvalidSchema(format!(
                    "duplicate module '{}'",
                    module.name
                )));
            }
            graph.modules.push(Module {
                name: module.name.clone(),
                revision: module.revision.clone(),
                top_level: Vec::new(),
            });
        }

        for (index, module) in raw.modules.iter().enumerate() {
            for node in &module.nodes {
                graph.insert(ModuleId(index), None, node)?;
            }
        }

        // Augments may target nodes contributed by other augments, so keep
        // applying until every target resolved or no progress is made.
        let mut pending: Vec<(ModuleId, &RawAugment)> = raw
            .modules
            .iter()
            .enumerate()
            .flat_map(|(index, m)| m.augments.iter().map(move |a| (ModuleId(index), a)))
            .collect();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();

            for (module, augment) in pending {
                match graph.resolve_target(&augment.target)? {
                    Some(target) => {
                        for node in &augment.nodes {
                            graph.insert(module, Some(target), node)?;
                        }
                    }
                    None => deferred.push((module, augment)),
                }
            }

            if deferred.len() == before {
                let targets: Vec<&str> = deferred.iter().map(|(_, a)| a.target.as_str()).collect();
                return Err(RpError::InvalidSchema(format!(
                    "unresolvable augment targets: {}",
                    targets.join(", ")
                )));
            }
            pending = deferred;
        }

        Ok(graph)
    }

    /// Get a module by id
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    /// Get a schema node by id
    pub fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    /// Iterate over all modules
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(index, m)| (ModuleId(index), m))
    }

    /// Look up a module by name
    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(ModuleId)
    }

    /// Look up a top-level node of `module` by name
    pub fn find_top_level(&self, module: ModuleId, name: &str) -> Option<NodeId> {
        self.module(module)
            .top_level
            .iter()
            .copied()
            .find(|&id| self.node(id).name == name)
    }

    /// Children of `parent` called `name`, from any contributing module
    pub fn children_named<'a>(
        &'a self,
        parent: NodeId,
        name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.node(parent)
            .children
            .iter()
            .copied()
            .filter(move |&id| self.node(id).name == name)
    }

    /// Check if `node` was contributed by a different module than its parent
    pub fn is_augment(&self, node: NodeId) -> bool {
        let node = self.node(node);
        node.parent
            .is_some_and(|parent| self.node(parent).module != node.module)
    }

    /// Schema path of `node`, qualified at the root and at augment boundaries
    pub fn path(&self, node: NodeId) -> String {
        let mut ids = vec![node];
        let mut current = node;
        while let Some(parent) = self.node(current).parent {
            ids.push(parent);
            current = parent;
        }

        let mut path = String::new();
        for &id in ids.iter().rev() {
            path.push('/');
            if self.node(id).parent.is_none() || self.is_augment(id) {
                path.push_str(&self.module(self.node(id).module).name);
                path.push(':');
            }
            path.push_str(&self.node(id).name);
        }
        path
    }

    fn insert(&mut self, module: ModuleId, parent: Option<NodeId>, raw: &RawNode) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        let scope = match parent {
            Some(p) => self.path(p),
            None => format!("module '{}'", self.module(module).name),
        };

        if let Some(p) = parent {
            if self.node(p).kind == NodeKind::Leaf {
                return Err(RpError::InvalidSchema(format!(
                    "leaf {} cannot have children",
                    scope
                )));
            }
        }

        let siblings = match parent {
            Some(p) => &self.node(p).children,
            None => &self.module(module).top_level,
        };
        let duplicate = siblings.iter().any(|&s| {
            let sibling = self.node(s);
            sibling.name == raw.name && sibling.module == module
        });
        if duplicate {
            return Err(RpError::InvalidSchema(format!(
                "duplicate node '{}' in {}",
                raw.name, scope
            )));
        }

        match raw.kind {
            NodeKind::List if raw.keys.is_empty() => {
                return Err(RpError::InvalidSchema(format!(
                    "list '{}' in {} declares no keys",
                    raw.name, scope
                )));
            }
            NodeKind::Container | NodeKind::Leaf if !raw.keys.is_empty() => {
                return Err(RpError::InvalidSchema(format!(
                    "non-list node '{}' in {} declares keys",
                    raw.name, scope
                )));
            }
            _ => {}
        }

        self.nodes.push(SchemaNode {
            name: raw.name.clone(),
            kind: raw.kind,
            module,
            parent,
            children: Vec::new(),
            keys: raw.keys.clone(),
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => self.modules[module.0].top_level.push(id),
        }

        for child in &raw.children {
            self.insert(module, Some(id), child)?;
        }

        for (i, key) in raw.keys.iter().enumerate() {
            if raw.keys[..i].contains(key) {
                return Err(RpError::InvalidSchema(format!(
                    "list {} declares key '{}' twice",
                    self.path(id),
                    key
                )));
            }
            let is_leaf = self
                .children_named(id, key)
                .any(|c| self.node(c).kind == NodeKind::Leaf && self.node(c).module == module);
            if !is_leaf {
                return Err(RpError::InvalidSchema(format!(
                    "key '{}' of list {} is not a leaf of the list",
                    key,
                    self.path(id)
                )));
            }
        }

        Ok(id)
    }

    /// Resolve an augment target; `None` when a step does not exist (yet)
    fn resolve_target(&self, target: &str) -> Result<Option<NodeId>> {
        let loc = LocationId::parse(target)
            .map_err(|e| RpError::InvalidSchema(format!("augment target: {}", e)))?;

        let mut current: Option<NodeId> = None;
        let mut module: Option<ModuleId> = None;

        for step in loc.steps() {
            if step.has_keys() {
                return Err(RpError::InvalidSchema(format!(
                    "augment target '{}' must not carry key predicates",
                    target
                )));
            }

            let step_module = match (&step.namespace, module) {
                (Some(ns), _) => self.find_module(ns).ok_or_else(|| {
                    RpError::InvalidSchema(format!(
                        "augment target '{}' names unknown module '{}'",
                        target, ns
                    ))
                })?,
                (None, Some(inherited)) => inherited,
                (None, None) => {
                    return Err(RpError::InvalidSchema(format!(
                        "augment target '{}' must be module-qualified",
                        target
                    )));
                }
            };

            let found = match current {
                None => self.find_top_level(step_module, &step.name),
                Some(parent) => self
                    .children_named(parent, &step.name)
                    .find(|&c| self.node(c).module == step_module),
            };
            match found {
                Some(id) => current = Some(id),
                None => return Ok(None),
            }
            module = Some(step_module);
        }

        Ok(current)
    }
}

impl FromStr for SchemaGraph {
    type Err = RpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_SCHEMA: &str = r#"{
        "modules": [
            {
                "name": "example-module",
                "revision": "2015-08-01",
                "nodes": [
                    {"name": "container", "kind": "container", "children": [
                        {"name": "list", "kind": "list", "keys": ["key1", "key2"], "children": [
                            {"name": "key1", "kind": "leaf"},
                            {"name": "key2", "kind": "leaf"},
                            {"name": "leaf", "kind": "leaf"}
                        ]}
                    ]}
                ]
            },
            {
                "name": "second-module",
                "augments": [
                    {"target": "/example-module:container/list/third-module:extra", "nodes": [
                        {"name": "deep", "kind": "leaf"}
                    ]},
                    {"target": "/example-module:container/list", "nodes": [
                        {"name": "added", "kind": "leaf"}
                    ]}
                ]
            },
            {
                "name": "third-module",
                "augments": [
                    {"target": "/example-module:container/list", "nodes": [
                        {"name": "extra", "kind": "container"}
                    ]}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_schema() {
        let schema: SchemaGraph = SAMPLE_SCHEMA.parse().unwrap();

        let module = schema.find_module("example-module").unwrap();
        assert_eq!(schema.module(module).revision(), Some("2015-08-01"));

        let container = schema.find_top_level(module, "container").unwrap();
        assert_eq!(schema.node(container).kind(), NodeKind::Container);

        let list = schema.children_named(container, "list").next().unwrap();
        assert!(schema.node(list).is_list());
        assert_eq!(schema.node(list).keys(), ["key1", "key2"]);
        assert_eq!(schema.node(list).parent(), Some(container));
    }

    #[test]
    fn test_augment_provenance() {
        let schema: SchemaGraph = SAMPLE_SCHEMA.parse().unwrap();
        let example = schema.find_module("example-module").unwrap();
        let second = schema.find_module("second-module").unwrap();
        let container = schema.find_top_level(example, "container").unwrap();
        let list = schema.children_named(container, "list").next().unwrap();

        let added = schema.children_named(list, "added").next().unwrap();
        assert_eq!(schema.node(added).module(), second);
        assert!(schema.is_augment(added));
        assert!(!schema.is_augment(list));

        // targets a node contributed by a later module's augment
        let extra = schema.children_named(list, "extra").next().unwrap();
        let deep = schema.children_named(extra, "deep").next().unwrap();
        assert_eq!(
            schema.path(deep),
            "/example-module:container/list/third-module:extra/second-module:deep"
        );
    }

    #[test]
    fn test_invalid_schemas() {
        let cases = [
            r#"{"modules": [{"name": "m"}, {"name": "m"}]}"#,
            r#"{"modules": [{"name": "m", "nodes": [{"name": "l", "kind": "list"}]}]}"#,
            r#"{"modules": [{"name": "m", "nodes": [{"name": "l", "kind": "list", "keys": ["k"]}]}]}"#,
            r#"{"modules": [{"name": "m", "nodes": [{"name": "c", "kind": "container", "keys": ["k"]}]}]}"#,
            r#"{"modules": [{"name": "m", "nodes": [{"name": "x", "kind": "leaf", "children": [{"name": "y", "kind": "leaf"}]}]}]}"#,
            r#"{"modules": [{"name": "m", "nodes": [{"name": "c", "kind": "container"}, {"name": "c", "kind": "container"}]}]}"#,
            r#"{"modules": [{"name": "m", "augments": [{"target": "/m:missing", "nodes": []}]}]}"#,
            r#"{"modules": [{"name": "m", "augments": [{"target": "/missing:top", "nodes": []}]}]}"#,
        ];

        for case in cases {
            assert!(
                matches!(SchemaGraph::from_json_str(case), Err(RpError::InvalidSchema(_))),
                "expected InvalidSchema for {}",
                case
            );
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, SAMPLE_SCHEMA).unwrap();

        let schema = SchemaGraph::from_file(&path).unwrap();
        assert_eq!(schema.modules().count(), 3);

        assert!(matches!(
            SchemaGraph::from_file(dir.path().join("missing.json")),
            Err(RpError::Io(_))
        ));
    }
}
