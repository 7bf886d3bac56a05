//! The opcode registry and the primitive handler contract.
//!
//! A primitive receives the resolved [`Arguments`] for its activation and a
//! [`Capabilities`] value carrying the closed set of operations it may
//! request: suspend, done, report, set-timeout and enter-substack. Requests
//! are recorded during the invocation and applied by the dispatcher once the
//! handler returns, so the capability value is plain data rather than a
//! bundle of callbacks borrowing the thread.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::EngineError;
use crate::thread::ExecutionContext;
use crate::value::Value;

/// Outcome of a primitive handler invocation. `Some` is the synchronous
/// fast path for reporters; command blocks return `None`.
pub type BlockResult = Result<Option<Value>, EngineError>;

/// A primitive implementation registered for an opcode.
pub type BlockFunction = Box<dyn Fn(&Arguments, &mut Capabilities) -> BlockResult>;

/// The resolved arguments for one activation: literal fields plus evaluated
/// inputs, rebuilt fresh on every dispatch.
///
/// Accessors default missing arguments (0 / false / empty string), so a
/// handler never has to distinguish an absent input from an empty one.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<String, Value>,
}

impl Arguments {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// The raw value of an argument, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric argument; missing reads as 0.
    pub fn number(&self, name: &str) -> f64 {
        self.values.get(name).map_or(0.0, Value::to_number)
    }

    /// Boolean argument; missing reads as false.
    pub fn boolean(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(Value::to_bool)
    }

    /// String argument; missing reads as empty.
    pub fn string(&self, name: &str) -> String {
        self.values.get(name).map_or_else(String::new, Value::to_string_value)
    }

    /// Number of resolved arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no arguments were resolved.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Operations a handler requested during its invocation.
#[derive(Debug, Default)]
pub(crate) struct Requests {
    pub(crate) suspend: bool,
    pub(crate) done: bool,
    pub(crate) reported: Option<Value>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) substack: Option<usize>,
}

/// The capability value handed to a primitive for one activation.
///
/// Also carries the frame's [`ExecutionContext`], the only state a primitive
/// may keep between suspensions and across loop re-activations.
pub struct Capabilities {
    context: ExecutionContext,
    requests: Requests,
}

impl Capabilities {
    pub(crate) fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            requests: Requests::default(),
        }
    }

    /// Park the thread without completing the activation. The stack keeps
    /// its position; completion arrives later through a timeout or an
    /// external event.
    pub fn suspend(&mut self) {
        self.requests.suspend = true;
    }

    /// Complete the activation without producing a value.
    pub fn done(&mut self) {
        self.requests.done = true;
    }

    /// Complete the activation with a value. When this block is evaluating
    /// an input, the value lands in the calling frame's reported cache.
    pub fn report(&mut self, value: Value) {
        self.requests.reported = Some(value);
    }

    /// Schedule a deferred completion after `delay`. Implies suspension.
    pub fn set_timeout(&mut self, delay: Duration) {
        self.requests.timeout = Some(delay);
    }

    /// Ask the scheduler to step into branch `index` of this control block
    /// (1-based). Only honored in statement position.
    pub fn enter_substack(&mut self, index: usize) {
        self.requests.substack = Some(index);
    }

    /// The block's persistent context.
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Mutable access to the block's persistent context.
    pub fn context_mut(&mut self) -> &mut ExecutionContext {
        &mut self.context
    }

    pub(crate) fn finish(self) -> (ExecutionContext, Requests) {
        (self.context, self.requests)
    }
}

/// Registered primitive handlers, keyed by opcode.
pub struct Registry {
    handlers: HashMap<String, BlockFunction>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A registry pre-loaded with the standard operator and control opcodes.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::primitives::register_standard(&mut registry);
        registry
    }

    /// Register (or replace) the handler for `opcode`.
    pub fn register(
        &mut self,
        opcode: impl Into<String>,
        handler: impl Fn(&Arguments, &mut Capabilities) -> BlockResult + 'static,
    ) {
        self.handlers.insert(opcode.into(), Box::new(handler));
    }

    /// The handler registered for `opcode`, if any.
    pub fn handler_for(&self, opcode: &str) -> Option<&BlockFunction> {
        self.handlers.get(opcode)
    }

    /// Whether a handler is registered for `opcode`.
    pub fn contains(&self, opcode: &str) -> bool {
        self.handlers.contains_key(opcode)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
