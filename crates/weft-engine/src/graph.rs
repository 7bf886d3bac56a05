//! The block graph store.
//!
//! Blocks are owned by the graph; threads and the dispatcher only read them.
//! Mutation happens through the insert/update API between ticks, never while
//! a dispatch is in flight.

use std::collections::{BTreeMap, HashMap};

use crate::value::Value;

/// Identifier of a block in the graph.
pub type BlockId = String;

/// Input names with this prefix point at nested branches for control-flow
/// blocks (`SUBSTACK`, `SUBSTACK2`, ...); they are never evaluated as
/// arguments.
pub(crate) const SUBSTACK_INPUT_PREFIX: &str = "SUBSTACK";

/// A single node in the program graph: one operation, its literal fields,
/// its input references and an optional successor in a statement sequence.
#[derive(Debug, Clone)]
pub struct Block {
    opcode: String,
    fields: BTreeMap<String, Value>,
    inputs: BTreeMap<String, BlockId>,
    next: Option<BlockId>,
}

impl Block {
    /// Create a block with the given opcode and nothing else.
    pub fn new(opcode: impl Into<String>) -> Self {
        Self {
            opcode: opcode.into(),
            fields: BTreeMap::new(),
            inputs: BTreeMap::new(),
            next: None,
        }
    }

    /// Attach a literal field.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Attach an input reference to a child block.
    pub fn with_input(mut self, name: impl Into<String>, child: impl Into<BlockId>) -> Self {
        self.inputs.insert(name.into(), child.into());
        self
    }

    /// Set the next block in the statement sequence.
    pub fn with_next(mut self, next: impl Into<BlockId>) -> Self {
        self.next = Some(next.into());
        self
    }

    /// The block's opcode.
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// The block's literal fields.
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// All input references, including substack branch pointers.
    pub fn inputs(&self) -> &BTreeMap<String, BlockId> {
        &self.inputs
    }

    /// The next block in the sequence, if any.
    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// Overwrite a literal field in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

/// The program graph: a store of blocks keyed by id.
#[derive(Debug, Clone, Default)]
pub struct BlockGraph {
    blocks: HashMap<BlockId, Block>,
}

impl BlockGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a block under `id`.
    pub fn insert(&mut self, id: impl Into<BlockId>, block: Block) {
        self.blocks.insert(id.into(), block);
    }

    /// Look up a block by id.
    pub fn block(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Mutable access to a block, for field updates between ticks.
    pub fn block_mut(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks.get_mut(id)
    }

    /// Opcode of the block `id`, if it exists.
    pub fn opcode(&self, id: &str) -> Option<&str> {
        self.blocks.get(id).map(Block::opcode)
    }

    /// Literal fields of block `id`, in stable name order.
    pub fn fields(&self, id: &str) -> impl Iterator<Item = (&str, &Value)> {
        self.blocks
            .get(id)
            .map(Block::fields)
            .into_iter()
            .flatten()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Argument inputs of block `id`, in stable name order, excluding
    /// substack branch pointers.
    pub fn inputs(&self, id: &str) -> impl Iterator<Item = (&str, &str)> {
        self.blocks
            .get(id)
            .map(Block::inputs)
            .into_iter()
            .flatten()
            .filter(|(name, _)| !name.starts_with(SUBSTACK_INPUT_PREFIX))
            .map(|(name, child)| (name.as_str(), child.as_str()))
    }

    /// Branch `index` of a control block (1-based: `SUBSTACK`, `SUBSTACK2`,
    /// ...). An index of 0 is treated as 1.
    pub fn substack(&self, id: &str, index: usize) -> Option<&str> {
        let name = if index <= 1 {
            SUBSTACK_INPUT_PREFIX.to_string()
        } else {
            format!("{}{}", SUBSTACK_INPUT_PREFIX, index)
        };
        self.blocks
            .get(id)
            .and_then(|block| block.inputs.get(&name))
            .map(String::as_str)
    }

    /// Successor of block `id` in its statement sequence.
    pub fn next_block(&self, id: &str) -> Option<&str> {
        self.blocks.get(id).and_then(Block::next)
    }

    /// Whether a block with this id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.blocks.contains_key(id)
    }

    /// Iterate over all blocks.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Block)> {
        self.blocks.iter().map(|(id, block)| (id.as_str(), block))
    }

    /// Number of blocks in the graph.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the graph holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_graph() -> BlockGraph {
        let mut graph = BlockGraph::new();
        graph.insert(
            "loop",
            Block::new("control_repeat")
                .with_field("TIMES", Value::Number(3.0))
                .with_input("SUBSTACK", "body")
                .with_next("after"),
        );
        graph.insert(
            "body",
            Block::new("operator_add")
                .with_input("NUM1", "inner")
                .with_field("NUM2", Value::Number(1.0)),
        );
        graph.insert("inner", Block::new("noop"));
        graph.insert("after", Block::new("noop"));
        graph
    }

    #[test]
    fn test_inputs_exclude_substacks() {
        let graph = sample_graph();
        let inputs: Vec<_> = graph.inputs("loop").collect();
        assert!(inputs.is_empty());

        let inputs: Vec<_> = graph.inputs("body").collect();
        assert_eq!(inputs, vec![("NUM1", "inner")]);
    }

    #[test]
    fn test_substack_lookup() {
        let graph = sample_graph();
        assert_eq!(graph.substack("loop", 1), Some("body"));
        assert_eq!(graph.substack("loop", 0), Some("body"));
        assert_eq!(graph.substack("loop", 2), None);
        assert_eq!(graph.substack("body", 1), None);
    }

    #[test]
    fn test_second_substack_name() {
        let mut graph = BlockGraph::new();
        graph.insert(
            "branch",
            Block::new("control_if_else")
                .with_input("SUBSTACK", "yes")
                .with_input("SUBSTACK2", "no"),
        );
        assert_eq!(graph.substack("branch", 1), Some("yes"));
        assert_eq!(graph.substack("branch", 2), Some("no"));
    }

    #[test]
    fn test_next_and_fields() {
        let graph = sample_graph();
        assert_eq!(graph.next_block("loop"), Some("after"));
        assert_eq!(graph.next_block("after"), None);

        let fields: Vec<_> = graph.fields("loop").collect();
        assert_eq!(fields, vec![("TIMES", &Value::Number(3.0))]);
    }

    #[test]
    fn test_missing_block_accessors() {
        let graph = sample_graph();
        assert_eq!(graph.opcode("ghost"), None);
        assert_eq!(graph.inputs("ghost").count(), 0);
        assert_eq!(graph.fields("ghost").count(), 0);
    }
}
