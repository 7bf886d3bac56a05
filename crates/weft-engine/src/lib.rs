//! Execution engine for block-graph programs.
//!
//! A program is a graph of blocks; threads walk the graph, and the
//! dispatcher computes each block's output by recursively resolving its
//! argument sub-expressions. Primitives may suspend the whole call chain and
//! complete later, through a timeout or an external event, without
//! re-running arguments that already finished.

mod dispatch;
mod error;
mod graph;
mod loader;
mod primitives;
mod registry;
mod runtime;
mod scheduler;
mod thread;
mod value;

pub use error::EngineError;
pub use graph::{Block, BlockGraph, BlockId};
pub use loader::Program;
pub use primitives::register_standard;
pub use registry::{Arguments, BlockFunction, BlockResult, Capabilities, Registry};
pub use runtime::{EventSender, Runtime, ThreadEvent};
pub use thread::{ExecutionContext, StackFrame, Status, Thread, ThreadId};
pub use value::Value;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
