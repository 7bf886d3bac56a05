//! The execution runtime: threads, ticks and external completions.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::EngineError;
use crate::graph::{BlockGraph, BlockId};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::thread::{Status, Thread, ThreadId};
use crate::value::Value;

/// An external completion for a suspended thread.
///
/// These are how the outside world finishes an activation that parked
/// itself: an async reporter delivers its value with [`ThreadEvent::Report`],
/// a command acknowledges with [`ThreadEvent::Completed`].
#[derive(Debug)]
pub enum ThreadEvent {
    /// Deliver a reported value to the thread's pending activation.
    Report { thread: ThreadId, value: Value },
    /// Complete the thread's pending activation without a value.
    Completed { thread: ThreadId },
}

/// Cloneable sender for delivering [`ThreadEvent`]s into a runtime.
pub type EventSender = Sender<ThreadEvent>;

/// Owns the graph, the opcode registry and all threads, and drives them
/// tick by tick.
pub struct Runtime {
    graph: BlockGraph,
    registry: Registry,
    scheduler: Scheduler,
    threads: Vec<Thread>,
    next_thread: usize,
    events: Receiver<ThreadEvent>,
    event_tx: Sender<ThreadEvent>,
}

impl Runtime {
    /// Create a runtime over `graph` with the standard primitives.
    pub fn new(graph: BlockGraph) -> Self {
        Self::with_registry(graph, Registry::standard())
    }

    /// Create a runtime with a caller-provided registry.
    pub fn with_registry(graph: BlockGraph, registry: Registry) -> Self {
        let (event_tx, events) = channel();
        Self {
            graph,
            registry,
            scheduler: Scheduler::new(),
            threads: Vec::new(),
            next_thread: 0,
            events,
            event_tx,
        }
    }

    /// The block graph.
    pub fn graph(&self) -> &BlockGraph {
        &self.graph
    }

    /// Mutable access to the graph, for edits between ticks.
    pub fn graph_mut(&mut self) -> &mut BlockGraph {
        &mut self.graph
    }

    /// Mutable access to the opcode registry.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Start a new thread at `top_block`.
    pub fn spawn(&mut self, top_block: impl Into<BlockId>) -> ThreadId {
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        debug!(thread = ?id, "spawning thread");
        self.threads.push(Thread::new(id, top_block.into()));
        id
    }

    /// Look up a thread by id.
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id() == id)
    }

    /// A sender external event sources use to resume suspended threads.
    pub fn event_sender(&self) -> EventSender {
        self.event_tx.clone()
    }

    /// Apply one completion event immediately.
    ///
    /// Equivalent to sending it through [`Runtime::event_sender`] and
    /// letting the next tick drain it.
    pub fn deliver(&mut self, event: ThreadEvent) {
        match event {
            ThreadEvent::Report { thread, value } => self.complete_pending(thread, Some(value)),
            ThreadEvent::Completed { thread } => self.complete_pending(thread, None),
        }
    }

    /// One tick: deliver queued completions, wake expired timeouts, then
    /// step running threads for one quantum.
    ///
    /// A primitive failure halts the faulting thread and is returned to the
    /// caller; the other threads keep their stacks and remain runnable.
    pub fn step(&mut self) -> Result<(), EngineError> {
        self.drain_events();
        self.wake_timeouts();
        self.scheduler
            .step_threads(&self.graph, &self.registry, &mut self.threads)
    }

    /// Drive the runtime until every thread finishes.
    ///
    /// Sleeps for pending timeouts. Returns [`EngineError::Stalled`] when
    /// only suspended threads without wake deadlines remain; programs
    /// waiting on external events should be driven with [`Runtime::step`]
    /// and the event sender instead.
    pub fn run(&mut self) -> Result<(), EngineError> {
        while !self.all_finished() {
            self.step()?;
            if self.threads.iter().any(|t| t.status() == Status::Running) {
                continue;
            }
            if self.all_finished() {
                break;
            }
            match self.next_wake() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                }
                None => return Err(EngineError::Stalled),
            }
        }
        Ok(())
    }

    /// Discard a thread's stack without running any completion path.
    pub fn stop_thread(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.iter_mut().find(|t| t.id() == id) {
            debug!(thread = ?id, "halting thread");
            thread.halt();
        }
    }

    /// Whether every spawned thread has finished.
    pub fn all_finished(&self) -> bool {
        self.threads
            .iter()
            .all(|thread| thread.status() == Status::Finished)
    }

    fn drain_events(&mut self) {
        let queued: Vec<ThreadEvent> = self.events.try_iter().collect();
        for event in queued {
            self.deliver(event);
        }
    }

    fn wake_timeouts(&mut self) {
        let now = Instant::now();
        let due: Vec<ThreadId> = self
            .threads
            .iter()
            .filter(|t| t.status() == Status::Suspended && t.wake_due(now))
            .map(Thread::id)
            .collect();
        for id in due {
            debug!(thread = ?id, "timeout elapsed; completing pending activation");
            self.complete_pending(id, None);
        }
    }

    /// Resume a suspended thread by completing its pending activation: a
    /// pending input reports into its parent's cache and comes off the
    /// stack, a pending command advances to its successor. Either way the
    /// re-entered block replays its argument resolution from the cache on
    /// the next step.
    fn complete_pending(&mut self, id: ThreadId, value: Option<Value>) {
        let Some(thread) = self.threads.iter_mut().find(|t| t.id() == id) else {
            warn!(thread = ?id, "completion for unknown thread");
            return;
        };
        if thread.status() != Status::Suspended {
            warn!(thread = ?id, "completion for a thread that is not suspended");
            return;
        }
        thread.set_status(Status::Running);
        thread.clear_timeout();
        if thread.pending_input().is_some() {
            thread.push_reported_value(value.unwrap_or(Value::Null));
            thread.pop_stack();
        } else {
            self.scheduler.proceed_thread(&self.graph, thread);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.threads
            .iter()
            .filter(|t| t.status() == Status::Suspended)
            .filter_map(Thread::wake_at)
            .min()
    }
}
