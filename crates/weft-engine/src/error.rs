//! Error types for the block engine.

use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Unknown opcodes and unregistered handlers are deliberately *not* errors:
/// they are logged and treated as no-op completions so one broken block
/// cannot wedge the rest of the program (see `dispatch`).
#[derive(Error, Debug)]
pub enum EngineError {
    /// The program source is not valid JSON.
    #[error("invalid program JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The program JSON parsed but does not describe a valid block graph.
    #[error("malformed program: {0}")]
    Load(String),

    /// A primitive implementation failed during an activation.
    #[error("primitive '{opcode}' failed: {message}")]
    Primitive { opcode: String, message: String },

    /// Every remaining thread is suspended with no timeout or queued
    /// completion left to wake it.
    #[error("all threads are suspended with no pending wakeup")]
    Stalled,
}

impl EngineError {
    /// Construct a primitive failure.
    pub fn primitive(opcode: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Primitive {
            opcode: opcode.into(),
            message: message.into(),
        }
    }
}
