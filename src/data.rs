//! Data tree instances
//!
//! A [`DataTree`] holds one configuration/state tree as an arena of slots.
//! Ownership is strictly top-down; each node keeps its parent's index so the
//! XPath builder can walk upward. Removed slots go on a free list and are
//! reused; each slot carries a generation so a stale [`DataNodeId`] resolves
//! to nothing.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, RpError};
use crate::location_id::Step;
use crate::schema::{NodeId, NodeKind, SchemaGraph, SchemaNode};

/// Index of a node in a [`DataTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNodeId {
    index: usize,
    generation: u32,
}

/// A node of a data tree
#[derive(Debug, Clone)]
pub struct DataNode {
    schema: NodeId,
    value: Option<String>,
    parent: Option<DataNodeId>,
    children: Vec<DataNodeId>,
}

impl DataNode {
    /// Schema node this instance conforms to
    pub fn schema(&self) -> NodeId {
        self.schema
    }

    /// Leaf value; `None` for containers and list instances
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Enclosing node; `None` for a root
    pub fn parent(&self) -> Option<DataNodeId> {
        self.parent
    }

    /// Child nodes in insertion order
    pub fn children(&self) -> &[DataNodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<DataNode>,
}

/// A data tree bound to a schema graph
#[derive(Debug, Clone)]
pub struct DataTree {
    schema: Arc<SchemaGraph>,
    slots: Vec<Slot>,
    /// Indices of empty slots
    free: Vec<usize>,
    roots: Vec<DataNodeId>,
}

impl DataTree {
    /// Create an empty tree
    pub fn new(schema: Arc<SchemaGraph>) -> Self {
        Self {
            schema,
            slots: Vec::new(),
            free: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Import YANG-JSON encoded data
    ///
    /// Top-level members are `module:node`; nested members are plain node
    /// names unless they belong to an augmenting module.
    pub fn from_json(schema: Arc<SchemaGraph>, data: &Value) -> Result<Self> {
        let mut tree = Self::new(Arc::clone(&schema));
        let members = data
            .as_object()
            .ok_or_else(|| RpError::InvalidArgument("data must be a JSON object".into()))?;

        for (member, value) in members {
            let (ns, name) = member.split_once(':').ok_or_else(|| {
                RpError::InvalidArgument(format!(
                    "top-level member '{}' must be module-qualified",
                    member
                ))
            })?;
            let module = schema
                .find_module(ns)
                .ok_or_else(|| RpError::UnknownModel(format!("module '{}' is not loaded", ns)))?;
            let node = schema.find_top_level(module, name).ok_or_else(|| {
                RpError::BadElement(format!("node '{}' not found in module '{}'", name, ns))
            })?;
            tree.import(&schema, None, node, value)?;
        }

        Ok(tree)
    }

    /// Import YANG-JSON data from a string
    pub fn from_json_str(schema: Arc<SchemaGraph>, json: &str) -> Result<Self> {
        let data: Value = serde_json::from_str(json)?;
        Self::from_json(schema, &data)
    }

    /// Schema graph the tree conforms to
    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    /// Shared handle on the schema graph
    pub fn schema_arc(&self) -> &Arc<SchemaGraph> {
        &self.schema
    }

    /// Top-level nodes
    pub fn roots(&self) -> &[DataNodeId] {
        &self.roots
    }

    /// Get a node; `None` if it was removed
    pub fn get(&self, id: DataNodeId) -> Option<&DataNode> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    /// Schema node of a data node
    pub fn schema_node(&self, id: DataNodeId) -> Option<&SchemaNode> {
        self.get(id).map(|n| self.schema.node(n.schema))
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check if the tree has no nodes
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Children of `parent`, or the roots when `parent` is `None`
    pub fn children_of(&self, parent: Option<DataNodeId>) -> &[DataNodeId] {
        match parent {
            Some(p) => self.get(p).map(|n| n.children.as_slice()).unwrap_or(&[]),
            None => &self.roots,
        }
    }

    /// Find the child of `parent` that is an instance of `schema` and matches
    /// the key predicates of `step`
    pub fn find_child(
        &self,
        parent: Option<DataNodeId>,
        schema: NodeId,
        step: &Step,
    ) -> Option<DataNodeId> {
        self.children_of(parent).iter().copied().find(|&id| {
            self.get(id).is_some_and(|n| n.schema == schema)
                && step
                    .keys
                    .iter()
                    .all(|k| self.key_value(id, &k.name) == Some(k.value.as_str()))
        })
    }

    /// Value of the key leaf `key` of a list instance
    pub fn key_value(&self, list: DataNodeId, key: &str) -> Option<&str> {
        let list_node = self.get(list)?;
        let module = self.schema.node(list_node.schema).module();

        list_node.children.iter().find_map(|&c| {
            let child = self.get(c)?;
            let schema = self.schema.node(child.schema);
            if schema.name() == key && schema.module() == module && schema.kind() == NodeKind::Leaf
            {
                child.value.as_deref()
            } else {
                None
            }
        })
    }

    /// Insert a node under `parent` (or as a root)
    ///
    /// The schema node must be a child of the parent's schema node (or top
    /// level), and only leaves carry a value. Containers and leaves exist at
    /// most once per parent; list instances are told apart by their keys.
    pub fn insert(
        &mut self,
        parent: Option<DataNodeId>,
        schema: NodeId,
        value: Option<String>,
    ) -> Result<DataNodeId> {
        let schema_node = self.schema.node(schema);
        let expected_parent = match parent {
            Some(p) => Some(
                self.get(p)
                    .ok_or_else(|| RpError::InvalidArgument("parent node was removed".into()))?
                    .schema,
            ),
            None => None,
        };
        if schema_node.parent() != expected_parent {
            return Err(RpError::InvalidArgument(format!(
                "{} cannot be placed here",
                self.schema.path(schema)
            )));
        }
        match (schema_node.kind(), &value) {
            (NodeKind::Leaf, None) => {
                return Err(RpError::InvalidArgument(format!(
                    "leaf {} requires a value",
                    self.schema.path(schema)
                )));
            }
            (NodeKind::Container | NodeKind::List, Some(_)) => {
                return Err(RpError::InvalidArgument(format!(
                    "{} does not carry a value",
                    self.schema.path(schema)
                )));
            }
            _ => {}
        }
        if schema_node.kind() != NodeKind::List
            && self
                .children_of(parent)
                .iter()
                .any(|&c| self.get(c).is_some_and(|n| n.schema == schema))
        {
            return Err(RpError::InvalidArgument(format!(
                "{} already exists",
                self.schema.path(schema)
            )));
        }

        let id = self.alloc(DataNode {
            schema,
            value,
            parent,
            children: Vec::new(),
        });
        match parent {
            Some(p) => {
                if let Some(p) = self.node_mut(p) {
                    p.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        Ok(id)
    }

    /// Replace the value of a leaf
    pub fn set_value(&mut self, id: DataNodeId, value: String) -> Result<()> {
        let schema = self
            .get(id)
            .ok_or_else(|| RpError::InvalidArgument("node was removed".into()))?
            .schema;
        if self.schema.node(schema).kind() != NodeKind::Leaf {
            return Err(RpError::InvalidArgument(format!(
                "{} does not carry a value",
                self.schema.path(schema)
            )));
        }
        if let Some(node) = self.node_mut(id) {
            node.value = Some(value);
        }
        Ok(())
    }

    /// Remove a node and its subtree; returns false if it was already gone
    pub fn remove(&mut self, id: DataNodeId) -> bool {
        let Some(node) = self.release(id) else {
            return false;
        };

        match node.parent {
            Some(p) => {
                if let Some(parent) = self.node_mut(p) {
                    parent.children.retain(|&c| c != id);
                }
            }
            None => self.roots.retain(|&c| c != id),
        }

        let mut stack = node.children;
        while let Some(child) = stack.pop() {
            if let Some(removed) = self.release(child) {
                stack.extend(removed.children);
            }
        }
        true
    }

    /// Address of `id`, see [`crate::xpath::build`]
    pub fn xpath(&self, id: DataNodeId) -> Result<String> {
        crate::xpath::build(self, id)
    }

    fn node_mut(&mut self, id: DataNodeId) -> Option<&mut DataNode> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn alloc(&mut self, node: DataNode) -> DataNodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                DataNodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                DataNodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Empty the slot of `id`, invalidating every id that points at it
    fn release(&mut self, id: DataNodeId) -> Option<DataNode> {
        let slot = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)?;
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(node)
    }

    fn import(
        &mut self,
        schema: &SchemaGraph,
        parent: Option<DataNodeId>,
        node: NodeId,
        value: &Value,
    ) -> Result<()> {
        match schema.node(node).kind() {
            NodeKind::Leaf => {
                self.insert(parent, node, Some(scalar_to_string(schema, node, value)?))?;
            }
            NodeKind::Container => {
                let members = expect_object(schema, node, value)?;
                let id = self.insert(parent, node, None)?;
                self.import_members(schema, id, node, members)?;
            }
            NodeKind::List => {
                let entries = value.as_array().ok_or_else(|| {
                    RpError::InvalidArgument(format!(
                        "list {} must be a JSON array",
                        schema.path(node)
                    ))
                })?;
                for entry in entries {
                    let members = expect_object(schema, node, entry)?;
                    let id = self.insert(parent, node, None)?;
                    self.import_members(schema, id, node, members)?;
                    self.check_instance(schema, parent, node, id)?;
                }
            }
        }
        Ok(())
    }

    fn import_members(
        &mut self,
        schema: &SchemaGraph,
        id: DataNodeId,
        node: NodeId,
        members: &Map<String, Value>,
    ) -> Result<()> {
        let module = schema.node(node).module();
        for (member, value) in members {
            let child = match member.split_once(':') {
                Some((ns, name)) => schema
                    .children_named(node, name)
                    .find(|&c| schema.module(schema.node(c).module()).name() == ns),
                None => schema
                    .children_named(node, member)
                    .find(|&c| schema.node(c).module() == module),
            };
            let child = child.ok_or_else(|| {
                RpError::BadElement(format!(
                    "member '{}' not found under {}",
                    member,
                    schema.path(node)
                ))
            })?;
            self.import(schema, Some(id), child, value)?;
        }
        Ok(())
    }

    /// A freshly imported list instance needs all its keys, each expressible
    /// in an address, and unique among siblings
    fn check_instance(
        &self,
        schema: &SchemaGraph,
        parent: Option<DataNodeId>,
        node: NodeId,
        id: DataNodeId,
    ) -> Result<()> {
        let keys = schema.node(node).keys();
        let values: Vec<Option<&str>> = keys.iter().map(|k| self.key_value(id, k)).collect();

        if let Some(missing) = keys.iter().zip(&values).find(|(_, v)| v.is_none()) {
            return Err(RpError::IncompleteKey(format!(
                "instance of {} lacks key '{}'",
                schema.path(node),
                missing.0
            )));
        }
        for (key, value) in keys.iter().zip(values.iter().flatten()) {
            if value.contains('\'') && value.contains('"') {
                return Err(RpError::InvalidArgument(format!(
                    "value of key '{}' in {} contains both quote characters",
                    key,
                    schema.path(node)
                )));
            }
        }

        let duplicate = self.children_of(parent).iter().any(|&other| {
            other != id
                && self.get(other).is_some_and(|n| n.schema == node)
                && keys
                    .iter()
                    .zip(&values)
                    .all(|(k, v)| self.key_value(other, k) == *v)
        });
        if duplicate {
            return Err(RpError::InvalidArgument(format!(
                "duplicate instance of {}",
                schema.path(node)
            )));
        }
        Ok(())
    }
}

fn expect_object<'v>(
    schema: &SchemaGraph,
    node: NodeId,
    value: &'v Value,
) -> Result<&'v Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        RpError::InvalidArgument(format!("{} must be a JSON object", schema.path(node)))
    })
}

fn scalar_to_string(schema: &SchemaGraph, node: NodeId, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(RpError::InvalidArgument(format!(
            "leaf {} must hold a scalar value",
            schema.path(node)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{DataManager, DatastoreKind};
    use crate::location_id::LocationId;
    use crate::validator::validate;

    const SAMPLE_SCHEMA: &str = r#"{
        "modules": [
            {"name": "example-module", "nodes": [
                {"name": "container", "kind": "container", "children": [
                    {"name": "list", "kind": "list", "keys": ["key1", "key2"], "children": [
                        {"name": "key1", "kind": "leaf"},
                        {"name": "key2", "kind": "leaf"},
                        {"name": "leaf", "kind": "leaf"}
                    ]}
                ]}
            ]},
            {"name": "small-module", "augments": [
                {"target": "/example-module:container", "nodes": [
                    {"name": "enabled", "kind": "leaf"}
                ]}
            ]}
        ]
    }"#;

    const SAMPLE_DATA: &str = r#"{
        "example-module:container": {
            "list": [
                {"key1": "a", "key2": "b", "leaf": "first"},
                {"key1": "a", "key2": "c", "leaf": 42}
            ],
            "small-module:enabled": true
        }
    }"#;

    fn tree() -> DataTree {
        let schema = Arc::new(SAMPLE_SCHEMA.parse::<SchemaGraph>().unwrap());
        DataTree::from_json_str(schema, SAMPLE_DATA).unwrap()
    }

    #[test]
    fn test_import_json() {
        let tree = tree();

        assert_eq!(tree.roots().len(), 1);
        // container, 2 x (list + 3 leaves), enabled
        assert_eq!(tree.len(), 10);

        let container = tree.roots()[0];
        let lists: Vec<DataNodeId> = tree
            .children_of(Some(container))
            .iter()
            .copied()
            .filter(|&c| tree.schema_node(c).unwrap().is_list())
            .collect();
        assert_eq!(lists.len(), 2);
        assert_eq!(tree.key_value(lists[0], "key2"), Some("b"));
    }

    #[test]
    fn test_find_child_by_keys() {
        let tree = tree();
        let container = tree.roots()[0];
        let list_schema = tree.schema_node(container).unwrap().children()[0];

        let loc = LocationId::parse("/example-module:container/list[key2='c'][key1='a']").unwrap();
        let found = tree.find_child(Some(container), list_schema, loc.last()).unwrap();
        assert_eq!(tree.key_value(found, "key2"), Some("c"));

        let loc = LocationId::parse("/example-module:container/list[key1='a'][key2='x']").unwrap();
        assert!(tree.find_child(Some(container), list_schema, loc.last()).is_none());
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = tree();
        let container = tree.roots()[0];
        let first_list = tree.children_of(Some(container))[0];
        let before = tree.len();

        assert!(tree.remove(first_list));
        assert_eq!(tree.len(), before - 4);
        assert!(tree.get(first_list).is_none());
        assert!(!tree.remove(first_list));
        assert!(!tree.children_of(Some(container)).contains(&first_list));
    }

    #[test]
    fn test_insert_checks_placement() {
        let mut tree = tree();
        let container = tree.roots()[0];
        let container_schema = tree.get(container).unwrap().schema();

        // container under itself
        assert!(matches!(
            tree.insert(Some(container), container_schema, None),
            Err(RpError::InvalidArgument(_))
        ));
        // container with a value
        assert!(matches!(
            tree.insert(None, container_schema, Some("x".into())),
            Err(RpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_import_rejects_bad_data() {
        let schema = Arc::new(SAMPLE_SCHEMA.parse::<SchemaGraph>().unwrap());
        let cases = [
            (r#"{"container": {}}"#, "unqualified"),
            (r#"{"missing-module:container": {}}"#, "unknown module"),
            (r#"{"example-module:container": {"enabled": true}}"#, "augment without prefix"),
            (r#"{"example-module:container": {"list": [{"key1": "a"}]}}"#, "missing key"),
            (
                r#"{"example-module:container": {"list": [{"key1": "a", "key2": "b"}, {"key1": "a", "key2": "b"}]}}"#,
                "duplicate instance",
            ),
            (r#"{"example-module:container": {"small-module:enabled": [1]}}"#, "non-scalar leaf"),
            (
                r#"{"example-module:container": {"list": [{"key1": "a'b\"c", "key2": "b"}]}}"#,
                "unaddressable key value",
            ),
        ];

        for (json, what) in cases {
            assert!(
                DataTree::from_json_str(Arc::clone(&schema), json).is_err(),
                "expected failure for {}",
                what
            );
        }
    }

    #[test]
    fn test_key_with_both_quotes_is_rejected() {
        let schema = Arc::new(SAMPLE_SCHEMA.parse::<SchemaGraph>().unwrap());
        let json = r#"{"example-module:container": {"list": [
            {"key1": "a'b\"c", "key2": "b", "leaf": "1"},
            {"key1": "ok", "key2": "b", "leaf": "2"}
        ]}}"#;

        assert!(matches!(
            DataTree::from_json_str(schema, json),
            Err(RpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_insert_rejects_second_instance() {
        let mut tree = tree();
        let container = tree.roots()[0];
        let container_schema = tree.get(container).unwrap().schema();
        let first_list = tree.children_of(Some(container))[0];
        let leaf_schema = tree
            .schema()
            .children_named(tree.get(first_list).unwrap().schema(), "leaf")
            .next()
            .unwrap();

        assert!(matches!(
            tree.insert(None, container_schema, None),
            Err(RpError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.insert(Some(first_list), leaf_schema, Some("again".into())),
            Err(RpError::InvalidArgument(_))
        ));
        assert_eq!(tree.len(), 10);
    }

    #[test]
    fn test_stale_id_after_slot_reuse() {
        let mut tree = tree();
        let container = tree.roots()[0];
        let first_list = tree.children_of(Some(container))[0];
        let leaf = *tree.get(first_list).unwrap().children().last().unwrap();
        let leaf_schema = tree.get(leaf).unwrap().schema();

        assert!(tree.remove(leaf));
        let replacement = tree
            .insert(Some(first_list), leaf_schema, Some("second".into()))
            .unwrap();

        assert_ne!(leaf, replacement);
        assert!(tree.get(leaf).is_none());
        assert!(!tree.remove(leaf));
        assert_eq!(tree.get(replacement).unwrap().value(), Some("second"));
        assert_eq!(tree.slots.len(), 10);
    }

    #[test]
    fn test_slots_stay_bounded_over_set_delete_cycles() {
        let schema = Arc::new(SAMPLE_SCHEMA.parse::<SchemaGraph>().unwrap());
        let dm = DataManager::new(Arc::clone(&schema), &[DatastoreKind::Running]);
        let mut handle = dm.open(DatastoreKind::Running).unwrap();

        let leaf =
            LocationId::parse("/example-module:container/list[key1='x'][key2='y']/leaf").unwrap();
        let leaf = validate(&schema, &leaf).unwrap();
        let container = LocationId::parse("/example-module:container").unwrap();
        let container = validate(&schema, &container).unwrap();

        for _ in 0..10_000 {
            handle.set_item(&leaf, Some("v".into())).unwrap();
            handle.delete_item(&container).unwrap();
        }

        assert!(handle.tree().is_empty());
        assert_eq!(handle.tree().len(), 0);
        // container + list + 2 keys + leaf
        assert_eq!(handle.tree().slots.len(), 5);
    }
}
