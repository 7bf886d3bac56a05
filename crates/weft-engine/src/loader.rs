//! Loading block programs from JSON.
//!
//! A program is a `blocks` table plus a `scripts` list of top-level entry
//! blocks:
//!
//! ```json
//! {
//!   "scripts": ["start"],
//!   "blocks": {
//!     "start": { "opcode": "control_repeat",
//!                "fields": { "TIMES": 3 },
//!                "inputs": { "SUBSTACK": "greet" } },
//!     "greet": { "opcode": "io_print", "fields": { "MESSAGE": "hi" } }
//!   }
//! }
//! ```

use serde_json::Value as JsonValue;

use crate::error::EngineError;
use crate::graph::{Block, BlockGraph, BlockId};
use crate::value::Value;

/// A loaded program: the graph plus its top-level script entry points.
#[derive(Debug, Clone)]
pub struct Program {
    /// The block graph.
    pub blocks: BlockGraph,
    /// Blocks to spawn a thread on, in declaration order.
    pub scripts: Vec<BlockId>,
}

impl Program {
    /// Parse a program from its JSON source.
    pub fn from_json(source: &str) -> Result<Program, EngineError> {
        let json: JsonValue = serde_json::from_str(source)?;
        let root = json
            .as_object()
            .ok_or_else(|| EngineError::Load("program must be a JSON object".into()))?;

        let table = root
            .get("blocks")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| EngineError::Load("program is missing a \"blocks\" table".into()))?;

        let mut graph = BlockGraph::new();
        for (id, def) in table {
            graph.insert(id.clone(), parse_block(id, def)?);
        }
        validate_references(&graph)?;

        let mut scripts = Vec::new();
        if let Some(raw) = root.get("scripts") {
            let list = raw
                .as_array()
                .ok_or_else(|| EngineError::Load("\"scripts\" must be an array".into()))?;
            for entry in list {
                let id = entry
                    .as_str()
                    .ok_or_else(|| EngineError::Load("script entries must be block ids".into()))?;
                if !graph.contains(id) {
                    return Err(EngineError::Load(format!(
                        "script '{}' is not in the blocks table",
                        id
                    )));
                }
                scripts.push(id.to_string());
            }
        }

        Ok(Program {
            blocks: graph,
            scripts,
        })
    }
}

fn parse_block(id: &str, def: &JsonValue) -> Result<Block, EngineError> {
    let def = def
        .as_object()
        .ok_or_else(|| EngineError::Load(format!("block '{}' must be an object", id)))?;

    let opcode = def
        .get("opcode")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| EngineError::Load(format!("block '{}' has no opcode", id)))?;
    let mut block = Block::new(opcode);

    if let Some(raw) = def.get("fields") {
        let fields = raw
            .as_object()
            .ok_or_else(|| EngineError::Load(format!("fields of block '{}' must be an object", id)))?;
        for (name, literal) in fields {
            let value = Value::from_json_literal(literal).ok_or_else(|| {
                EngineError::Load(format!(
                    "field '{}' of block '{}' must be a scalar literal",
                    name, id
                ))
            })?;
            block = block.with_field(name.clone(), value);
        }
    }

    if let Some(raw) = def.get("inputs") {
        let inputs = raw
            .as_object()
            .ok_or_else(|| EngineError::Load(format!("inputs of block '{}' must be an object", id)))?;
        for (name, target) in inputs {
            let target = target.as_str().ok_or_else(|| {
                EngineError::Load(format!(
                    "input '{}' of block '{}' must be a block id",
                    name, id
                ))
            })?;
            block = block.with_input(name.clone(), target);
        }
    }

    if let Some(raw) = def.get("next") {
        if !raw.is_null() {
            let next = raw.as_str().ok_or_else(|| {
                EngineError::Load(format!("next of block '{}' must be a block id", id))
            })?;
            block = block.with_next(next);
        }
    }

    Ok(block)
}

fn validate_references(graph: &BlockGraph) -> Result<(), EngineError> {
    for (id, block) in graph.iter() {
        let inputs = block.inputs().values().map(String::as_str);
        for target in inputs.chain(block.next()) {
            if !graph.contains(target) {
                return Err(EngineError::Load(format!(
                    "block '{}' references missing block '{}'",
                    id, target
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_round_trip() {
        let source = r#"{
            "scripts": ["start"],
            "blocks": {
                "start": { "opcode": "operator_add",
                           "fields": { "NUM2": 3 },
                           "inputs": { "NUM1": "seven" },
                           "next": "after" },
                "seven": { "opcode": "operator_add",
                           "fields": { "NUM1": 7, "NUM2": 0 } },
                "after": { "opcode": "io_print", "fields": { "MESSAGE": "done" } }
            }
        }"#;

        let program = Program::from_json(source).unwrap();
        assert_eq!(program.scripts, vec!["start".to_string()]);
        assert_eq!(program.blocks.len(), 3);
        assert_eq!(program.blocks.opcode("start"), Some("operator_add"));
        assert_eq!(program.blocks.next_block("start"), Some("after"));

        let inputs: Vec<_> = program.blocks.inputs("start").collect();
        assert_eq!(inputs, vec![("NUM1", "seven")]);
    }

    #[test]
    fn test_null_next_is_accepted() {
        let source = r#"{
            "blocks": {
                "lone": { "opcode": "io_print", "next": null }
            }
        }"#;
        let program = Program::from_json(source).unwrap();
        assert_eq!(program.blocks.next_block("lone"), None);
        assert!(program.scripts.is_empty());
    }

    #[test]
    fn test_dangling_reference_is_rejected() {
        let source = r#"{
            "blocks": {
                "start": { "opcode": "operator_add", "inputs": { "NUM1": "ghost" } }
            }
        }"#;
        let err = Program::from_json(source).unwrap_err();
        assert!(matches!(err, EngineError::Load(message) if message.contains("ghost")));
    }

    #[test]
    fn test_non_scalar_field_is_rejected() {
        let source = r#"{
            "blocks": {
                "start": { "opcode": "io_print", "fields": { "MESSAGE": [1, 2] } }
            }
        }"#;
        assert!(matches!(
            Program::from_json(source),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn test_unknown_script_is_rejected() {
        let source = r#"{
            "scripts": ["ghost"],
            "blocks": {}
        }"#;
        assert!(matches!(
            Program::from_json(source),
            Err(EngineError::Load(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_a_json_error() {
        assert!(matches!(
            Program::from_json("{"),
            Err(EngineError::Json(_))
        ));
    }
}
