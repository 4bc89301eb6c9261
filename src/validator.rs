//! Location identifier validation against the schema graph
//!
//! Walks the steps of a [`LocationId`] from the root, resolving each one to a
//! schema node while enforcing the namespace and key rules:
//!
//! - the root step must name its module, which must be loaded
//! - a step crossing into a node contributed by another module (augment) must
//!   name that module; elsewhere the module is inherited and may be omitted
//! - list steps carry exactly the declared keys, other steps carry none

use log::trace;

use crate::error::{Result, RpError};
use crate::location_id::{LocationId, Step};
use crate::schema::{Module, ModuleId, NodeId, SchemaGraph, SchemaNode};

/// A location identifier resolved against a schema graph
///
/// Borrows both the graph and the identifier; the match is only valid while
/// the schema graph is alive.
#[derive(Debug, Clone)]
pub struct ResolvedPath<'a> {
    schema: &'a SchemaGraph,
    loc_id: &'a LocationId,
    /// Schema node matched by each step, root first
    nodes: Vec<NodeId>,
    /// Module that most recently contributed a node along the path
    module: ModuleId,
}

impl<'a> ResolvedPath<'a> {
    /// Schema graph the path was resolved against
    pub fn schema(&self) -> &'a SchemaGraph {
        self.schema
    }

    /// The resolved location identifier
    pub fn location_id(&self) -> &'a LocationId {
        self.loc_id
    }

    /// Schema node matched by each step, root first
    pub fn node_ids(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Steps paired with the schema node each one matched
    pub fn steps(&self) -> impl Iterator<Item = (&'a Step, NodeId)> + '_ {
        self.loc_id.steps().iter().zip(self.nodes.iter().copied())
    }

    /// The matched schema node
    pub fn node_id(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Schema node of the last step
    pub fn node(&self) -> &'a SchemaNode {
        self.schema.node(self.node_id())
    }

    /// The module owning the matched node (the augmenting module for augments)
    pub fn module_id(&self) -> ModuleId {
        self.module
    }

    /// Module owning the matched node
    pub fn module(&self) -> &'a Module {
        self.schema.module(self.module)
    }
}

/// Validate `loc_id` against `schema`, returning the matched module and node
pub fn validate<'a>(schema: &'a SchemaGraph, loc_id: &'a LocationId) -> Result<ResolvedPath<'a>> {
    let steps = loc_id.steps();
    let root = steps
        .first()
        .ok_or_else(|| RpError::MalformedAddress("empty location identifier".into()))?;

    let namespace = root.namespace.as_deref().ok_or_else(|| {
        RpError::MalformedAddress(format!(
            "namespace of the top-level node is not specified in '{}'",
            loc_id.xpath()
        ))
    })?;
    let mut module = schema
        .find_module(namespace)
        .ok_or_else(|| RpError::UnknownModel(format!("module '{}' is not loaded", namespace)))?;

    let mut current = schema.find_top_level(module, &root.name).ok_or_else(|| {
        RpError::BadElement(format!(
            "node '{}' not found in module '{}'",
            root.name, namespace
        ))
    })?;
    check_keys(schema, current, root)?;
    trace!("resolved step '{}' to {}", root, schema.path(current));

    let mut nodes = Vec::with_capacity(steps.len());
    nodes.push(current);

    for step in &steps[1..] {
        let child = resolve_child(schema, current, module, step)?;
        check_keys(schema, child, step)?;
        trace!("resolved step '{}' to {}", step, schema.path(child));

        module = schema.node(child).module();
        current = child;
        nodes.push(child);
    }

    Ok(ResolvedPath {
        schema,
        loc_id,
        nodes,
        module,
    })
}

fn resolve_child(
    schema: &SchemaGraph,
    parent: NodeId,
    module: ModuleId,
    step: &Step,
) -> Result<NodeId> {
    let mut candidates = schema.children_named(parent, &step.name).peekable();
    if candidates.peek().is_none() {
        return Err(RpError::BadElement(format!(
            "node '{}' not found under {}",
            step.name,
            schema.path(parent)
        )));
    }

    match step.namespace.as_deref() {
        Some(ns) => candidates
            .find(|&c| schema.module(schema.node(c).module()).name() == ns)
            .ok_or_else(|| {
                RpError::BadElement(format!(
                    "node '{}' under {} does not belong to module '{}'",
                    step.name,
                    schema.path(parent),
                    ns
                ))
            }),
        None => candidates
            .find(|&c| schema.node(c).module() == module)
            .ok_or_else(|| {
                RpError::BadElement(format!(
                    "augment node '{}' under {} requires a namespace",
                    step.name,
                    schema.path(parent)
                ))
            }),
    }
}

fn check_keys(schema: &SchemaGraph, node: NodeId, step: &Step) -> Result<()> {
    let schema_node = schema.node(node);

    if !schema_node.is_list() {
        if step.has_keys() {
            return Err(RpError::BadElement(format!(
                "{} is not a list and takes no keys",
                schema.path(node)
            )));
        }
        return Ok(());
    }

    let declared = schema_node.keys();
    if step.keys.len() != declared.len() {
        return Err(RpError::BadElement(format!(
            "list {} expects {} key(s), got {}",
            schema.path(node),
            declared.len(),
            step.keys.len()
        )));
    }

    for (i, key) in step.keys.iter().enumerate() {
        if !declared.contains(&key.name) {
            return Err(RpError::BadElement(format!(
                "'{}' is not a key of list {}",
                key.name,
                schema.path(node)
            )));
        }
        if step.keys[..i].iter().any(|k| k.name == key.name) {
            return Err(RpError::BadElement(format!(
                "key '{}' given twice for list {}",
                key.name,
                schema.path(node)
            )));
        }
    }

    Ok(())
}
