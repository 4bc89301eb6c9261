//! XPath construction for data nodes
//!
//! The inverse of location identifier validation: walks from a data node up to
//! its root and renders the address. Module qualifiers are written on the root
//! step and wherever a node was contributed by a different module than its
//! parent, which is exactly where the validator requires them.

use crate::data::{DataNodeId, DataTree};
use crate::error::{Result, RpError};

/// Create the address of `node`
pub fn build(tree: &DataTree, node: DataNodeId) -> Result<String> {
    let schema = tree.schema();

    let mut chain = Vec::new();
    let mut current = Some(node);
    while let Some(id) = current {
        let data = tree
            .get(id)
            .ok_or_else(|| RpError::InvalidArgument("data node was removed".into()))?;
        chain.push(id);
        current = data.parent();
    }

    let mut xpath = String::new();
    let mut parent_module = None;

    for &id in chain.iter().rev() {
        let Some(schema_node) = tree.schema_node(id) else {
            return Err(RpError::InvalidArgument("data node was removed".into()));
        };
        let module = schema_node.module();

        xpath.push('/');
        if parent_module != Some(module) {
            xpath.push_str(schema.module(module).name());
            xpath.push(':');
        }
        xpath.push_str(schema_node.name());

        if schema_node.is_list() {
            for key in schema_node.keys() {
                let value = tree.key_value(id, key).ok_or_else(|| {
                    RpError::IncompleteKey(format!(
                        "instance at {} lacks key '{}'",
                        xpath, key
                    ))
                })?;
                push_predicate(&mut xpath, key, value)?;
            }
        }

        parent_module = Some(module);
    }

    Ok(xpath)
}

fn push_predicate(xpath: &mut String, key: &str, value: &str) -> Result<()> {
    let quote = match (value.contains('\''), value.contains('"')) {
        (false, _) => '\'',
        (true, false) => '"',
        (true, true) => {
            return Err(RpError::MalformedAddress(format!(
                "value of key '{}' contains both quote characters",
                key
            )));
        }
    };

    xpath.push('[');
    xpath.push_str(key);
    xpath.push('=');
    xpath.push(quote);
    xpath.push_str(value);
    xpath.push(quote);
    xpath.push(']');
    Ok(())
}
