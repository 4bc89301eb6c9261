//! Datastores and per-session datastore handles
//!
//! The [`DataManager`] keeps one data tree per enabled datastore. Each session
//! opens a private [`DatastoreHandle`], a snapshot of its datastore that
//! get/set/delete operations act on.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::{DataNodeId, DataTree};
use crate::error::{Result, RpError};
use crate::location_id::Step;
use crate::schema::{NodeKind, SchemaGraph};
use crate::validator::ResolvedPath;

/// Named datastores a session can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreKind {
    Startup,
    Running,
    Candidate,
}

impl DatastoreKind {
    /// All known datastore kinds
    pub const ALL: [DatastoreKind; 3] = [
        DatastoreKind::Startup,
        DatastoreKind::Running,
        DatastoreKind::Candidate,
    ];

    /// Convert from the raw numeric value used on the wire
    pub fn from_raw(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Startup),
            1 => Ok(Self::Running),
            2 => Ok(Self::Candidate),
            other => Err(RpError::InvalidArgument(format!(
                "unknown datastore {}",
                other
            ))),
        }
    }

    /// Get the raw numeric value
    pub fn as_raw(self) -> u32 {
        match self {
            Self::Startup => 0,
            Self::Running => 1,
            Self::Candidate => 2,
        }
    }

    /// Datastore name as used in configuration and messages
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Running => "running",
            Self::Candidate => "candidate",
        }
    }
}

impl fmt::Display for DatastoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatastoreKind {
    type Err = RpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| RpError::InvalidArgument(format!("unknown datastore '{}'", s)))
    }
}

/// A data node as returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Canonical address of the node
    pub xpath: String,
    pub kind: NodeKind,
    /// Leaf value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Owner of the data trees of all enabled datastores
#[derive(Debug)]
pub struct DataManager {
    schema: Arc<SchemaGraph>,
    stores: RwLock<HashMap<DatastoreKind, DataTree>>,
}

impl DataManager {
    /// Create a manager with an empty tree for each enabled datastore
    pub fn new(schema: Arc<SchemaGraph>, enabled: &[DatastoreKind]) -> Self {
        let stores = enabled
            .iter()
            .map(|&kind| (kind, DataTree::new(Arc::clone(&schema))))
            .collect();
        Self {
            schema,
            stores: RwLock::new(stores),
        }
    }

    /// Schema graph all trees conform to
    pub fn schema(&self) -> &Arc<SchemaGraph> {
        &self.schema
    }

    /// Check if sessions may bind to `kind`
    pub fn is_enabled(&self, kind: DatastoreKind) -> bool {
        self.stores.read().contains_key(&kind)
    }

    /// Replace the content of a datastore
    pub fn load(&self, kind: DatastoreKind, tree: DataTree) -> Result<()> {
        if !Arc::ptr_eq(tree.schema_arc(), &self.schema) {
            return Err(RpError::InvalidArgument(
                "data tree is bound to a different schema".into(),
            ));
        }
        match self.stores.write().get_mut(&kind) {
            Some(store) => {
                debug!("loaded {} nodes into {} datastore", tree.len(), kind);
                *store = tree;
                Ok(())
            }
            None => Err(RpError::InvalidArgument(format!(
                "datastore {} is not enabled",
                kind
            ))),
        }
    }

    /// Replace the content of a datastore with YANG-JSON data
    pub fn load_json(&self, kind: DatastoreKind, json: &str) -> Result<()> {
        let tree = DataTree::from_json_str(Arc::clone(&self.schema), json)?;
        self.load(kind, tree)
    }

    /// Open a private handle on a datastore
    pub fn open(&self, kind: DatastoreKind) -> Result<DatastoreHandle> {
        let stores = self.stores.read();
        let tree = stores.get(&kind).ok_or_else(|| {
            RpError::InvalidArgument(format!("datastore {} is not enabled", kind))
        })?;
        Ok(DatastoreHandle {
            kind,
            tree: tree.clone(),
        })
    }
}

/// A session's private view of one datastore
#[derive(Debug)]
pub struct DatastoreHandle {
    kind: DatastoreKind,
    tree: DataTree,
}

impl DatastoreHandle {
    /// Datastore this handle was opened on
    pub fn kind(&self) -> DatastoreKind {
        self.kind
    }

    /// Current content of the handle
    pub fn tree(&self) -> &DataTree {
        &self.tree
    }

    /// Get the addressed node
    pub fn get_item(&self, path: &ResolvedPath<'_>) -> Result<Item> {
        let id = self.locate(path)?;
        self.item(id)
    }

    /// Get the children of the addressed node, or the node itself for a leaf
    pub fn get_items(&self, path: &ResolvedPath<'_>) -> Result<Vec<Item>> {
        let id = self.locate(path)?;
        if path.node().kind() == NodeKind::Leaf {
            return Ok(vec![self.item(id)?]);
        }
        self.tree
            .children_of(Some(id))
            .iter()
            .map(|&child| self.item(child))
            .collect()
    }

    /// Create or update the addressed node, creating missing ancestors
    ///
    /// List instances created on the way get their key leaves from the key
    /// predicates of the address.
    pub fn set_item(&mut self, path: &ResolvedPath<'_>, value: Option<String>) -> Result<()> {
        self.check_schema(path)?;
        let target = path.node();
        let xpath = path.location_id().xpath();

        match (target.kind(), &value) {
            (NodeKind::Leaf, None) => {
                return Err(RpError::InvalidArgument(format!(
                    "setting leaf {} requires a value",
                    xpath
                )));
            }
            (NodeKind::Container | NodeKind::List, Some(_)) => {
                return Err(RpError::InvalidArgument(format!(
                    "{} does not take a value",
                    xpath
                )));
            }
            _ => {}
        }
        if let (Some(expected), Some(value)) = (key_predicate_of(path), &value) {
            if expected != value.as_str() {
                return Err(RpError::InvalidArgument(format!(
                    "key leaf {} cannot be changed to '{}'",
                    xpath, value
                )));
            }
        }

        let count = path.node_ids().len();
        let mut parent: Option<DataNodeId> = None;
        for (i, (step, node)) in path.steps().enumerate() {
            let last = i + 1 == count;
            let id = match self.tree.find_child(parent, node, step) {
                Some(existing) => {
                    if last {
                        if let Some(value) = &value {
                            self.tree.set_value(existing, value.clone())?;
                        }
                    }
                    existing
                }
                None => {
                    let value = if last { value.clone() } else { None };
                    let created = self.tree.insert(parent, node, value)?;
                    self.insert_keys(path, created, step)?;
                    created
                }
            };
            parent = Some(id);
        }

        debug!("{} datastore: set {}", self.kind, xpath);
        Ok(())
    }

    /// Remove the addressed node and its subtree
    pub fn delete_item(&mut self, path: &ResolvedPath<'_>) -> Result<()> {
        let xpath = path.location_id().xpath();
        if key_predicate_of(path).is_some() {
            return Err(RpError::InvalidArgument(format!(
                "key leaf {} cannot be deleted",
                xpath
            )));
        }

        let id = self.locate(path)?;
        self.tree.remove(id);
        debug!("{} datastore: deleted {}", self.kind, xpath);
        Ok(())
    }

    fn check_schema(&self, path: &ResolvedPath<'_>) -> Result<()> {
        if std::ptr::eq(path.schema(), self.tree.schema()) {
            Ok(())
        } else {
            Err(RpError::InvalidArgument(
                "address was resolved against a different schema".into(),
            ))
        }
    }

    fn locate(&self, path: &ResolvedPath<'_>) -> Result<DataNodeId> {
        self.check_schema(path)?;

        let mut current = None;
        for (step, node) in path.steps() {
            let found = self.tree.find_child(current, node, step).ok_or_else(|| {
                RpError::NotFound(path.location_id().xpath().to_string())
            })?;
            current = Some(found);
        }
        current.ok_or_else(|| RpError::NotFound(path.location_id().xpath().to_string()))
    }

    fn insert_keys(
        &mut self,
        path: &ResolvedPath<'_>,
        list: DataNodeId,
        step: &Step,
    ) -> Result<()> {
        let schema = path.schema();
        let Some(list_schema) = self.tree.get(list).map(|n| n.schema()) else {
            return Ok(());
        };
        let list_node = schema.node(list_schema);

        for key in list_node.keys() {
            let key_schema = schema
                .children_named(list_schema, key)
                .find(|&c| schema.node(c).module() == list_node.module())
                .ok_or_else(|| RpError::BadElement(format!("list key '{}' is not defined", key)))?;
            let value = step
                .key(key)
                .ok_or_else(|| RpError::IncompleteKey(format!("missing value of key '{}'", key)))?;
            self.tree.insert(Some(list), key_schema, Some(value.to_string()))?;
        }
        Ok(())
    }

    fn item(&self, id: DataNodeId) -> Result<Item> {
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| RpError::NotFound("data node was removed".into()))?;
        Ok(Item {
            xpath: self.tree.xpath(id)?,
            kind: self
                .tree
                .schema_node(id)
                .map_or(NodeKind::Container, |n| n.kind()),
            value: node.value().map(str::to_string),
        })
    }
}

/// If the addressed node is a key leaf of its parent list, the value the
/// parent step's predicate assigns to it
fn key_predicate_of<'a>(path: &ResolvedPath<'a>) -> Option<&'a str> {
    let ids = path.node_ids();
    if ids.len() < 2 {
        return None;
    }
    let schema = path.schema();
    let node = schema.node(ids[ids.len() - 1]);
    let parent = schema.node(ids[ids.len() - 2]);

    let is_key = parent.is_list()
        && node.module() == parent.module()
        && parent.keys().iter().any(|k| k == node.name());
    if !is_key {
        return None;
    }
    path.location_id()
        .step(ids.len() - 2)
        .and_then(|step| step.key(node.name()))
}
