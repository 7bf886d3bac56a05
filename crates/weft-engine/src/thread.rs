//! Threads and stack frames.
//!
//! A thread is an independent cursor over the block graph: a stack of block
//! ids (top = block currently being evaluated) with one frame of state per
//! entry. Frames carry the reported-value cache that makes suspend/resume
//! replay safe, and the opaque context primitives use for their own state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::graph::BlockId;
use crate::value::Value;

/// Identifier of a spawned thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub(crate) usize);

/// Execution status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The thread has runnable work on its stack.
    Running,
    /// The thread is parked until an external completion or a timeout.
    Suspended,
    /// The thread's stack has emptied, or the thread was halted.
    Finished,
}

/// State a primitive keeps for one block across suspend/resume cycles and
/// across re-activations of a control block (e.g. a loop counter).
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    slots: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Read a slot.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Write a slot.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.slots.insert(key.into(), value);
    }

    /// Remove a slot, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.slots.remove(key)
    }
}

/// Per-activation state tied to one entry on a thread's stack.
#[derive(Debug, Clone)]
pub struct StackFrame {
    /// Input slot in the parent block this frame's value feeds, set when the
    /// frame was pushed to evaluate an input.
    waiting_input: Option<String>,
    /// Input values already computed for the current activation, keyed by
    /// input name. Presence in the map is the signal: a cached null, zero or
    /// empty string is a real value, not a miss.
    reported: HashMap<String, Value>,
    /// Opaque state owned by the block's primitive.
    context: ExecutionContext,
}

impl StackFrame {
    fn new(waiting_input: Option<String>) -> Self {
        Self {
            waiting_input,
            reported: HashMap::new(),
            context: ExecutionContext::default(),
        }
    }

    /// The parent input slot this frame's value feeds, if any.
    pub fn waiting_input(&self) -> Option<&str> {
        self.waiting_input.as_deref()
    }

    /// A value cached for `input` by an earlier pass of this activation.
    pub fn reported(&self, input: &str) -> Option<&Value> {
        self.reported.get(input)
    }

    /// Cache a computed input value for the current activation.
    pub fn cache_reported(&mut self, input: impl Into<String>, value: Value) {
        self.reported.insert(input.into(), value);
    }

    /// Drop all cached input values. Called when the activation completes;
    /// the next activation of this block re-evaluates its inputs.
    pub fn clear_reported(&mut self) {
        self.reported.clear();
    }

    /// The primitive-owned context for this block.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Mutable access to the primitive-owned context.
    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub(crate) fn take_context(&mut self) -> ExecutionContext {
        std::mem::take(&mut self.context)
    }

    pub(crate) fn put_context(&mut self, context: ExecutionContext) {
        self.context = context;
    }
}

/// An independent execution cursor over the block graph.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    top_block: BlockId,
    stack: Vec<BlockId>,
    frames: Vec<StackFrame>,
    status: Status,
    wake_at: Option<Instant>,
}

impl Thread {
    pub(crate) fn new(id: ThreadId, top_block: BlockId) -> Self {
        let mut thread = Self {
            id,
            top_block: top_block.clone(),
            stack: Vec::new(),
            frames: Vec::new(),
            status: Status::Running,
            wake_at: None,
        };
        thread.push_stack(top_block, None);
        thread
    }

    /// This thread's id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The block this thread was spawned on.
    pub fn top_block(&self) -> &str {
        &self.top_block
    }

    /// Current execution status.
    pub fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Number of entries on the stack.
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// The block currently on top of the stack.
    pub fn peek_stack(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Push a block, creating its frame. `waiting_input` names the parent
    /// input slot when the push is for input evaluation.
    pub(crate) fn push_stack(&mut self, block: BlockId, waiting_input: Option<String>) {
        self.stack.push(block);
        self.frames.push(StackFrame::new(waiting_input));
    }

    /// Pop the top entry and its frame.
    pub(crate) fn pop_stack(&mut self) -> Option<BlockId> {
        self.frames.pop();
        self.stack.pop()
    }

    /// The frame of the block on top of the stack.
    pub fn peek_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub(crate) fn peek_frame_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    /// The parent input slot the top of the stack is evaluating, if any.
    pub fn pending_input(&self) -> Option<&str> {
        self.frames.last().and_then(StackFrame::waiting_input)
    }

    /// Deliver a value into the parent frame's reported cache, under the
    /// input slot the top frame is evaluating. A thread with no pending
    /// input slot drops the value.
    pub(crate) fn push_reported_value(&mut self, value: Value) {
        let Some(input) = self
            .frames
            .last()
            .and_then(|frame| frame.waiting_input.clone())
        else {
            trace!(thread = ?self.id, "reported value with no pending input slot");
            return;
        };
        let depth = self.frames.len();
        if depth >= 2 {
            self.frames[depth - 2].cache_reported(input, value);
        }
    }

    /// Record a wake deadline `delay` from now.
    pub(crate) fn register_timeout(&mut self, delay: Duration) {
        self.wake_at = Some(Instant::now() + delay);
    }

    pub(crate) fn clear_timeout(&mut self) {
        self.wake_at = None;
    }

    pub(crate) fn wake_at(&self) -> Option<Instant> {
        self.wake_at
    }

    pub(crate) fn wake_due(&self, now: Instant) -> bool {
        self.wake_at.is_some_and(|deadline| deadline <= now)
    }

    /// Discard the stack without running any completion path.
    pub(crate) fn halt(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.wake_at = None;
        self.status = Status::Finished;
    }
}
