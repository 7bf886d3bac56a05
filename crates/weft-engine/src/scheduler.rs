//! Cooperative scheduling of block threads.
//!
//! The scheduler owns thread advancement: stepping running threads through
//! the dispatcher, popping completed activations, following `next` pointers
//! and entering substacks for control-flow primitives. It never preempts:
//! a thread leaves the running state only by finishing or suspending.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::dispatch::{dispatch, Dispatch};
use crate::error::EngineError;
use crate::graph::BlockGraph;
use crate::registry::Registry;
use crate::thread::{Status, Thread};
use crate::value::Value;

/// How long one round of `step_threads` may keep running threads before
/// control returns to the caller.
const WORK_QUANTUM: Duration = Duration::from_millis(10);

/// Drives threads through the dispatcher.
#[derive(Debug)]
pub(crate) struct Scheduler {
    work_quantum: Duration,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            work_quantum: WORK_QUANTUM,
        }
    }

    /// Step every running thread round-robin until none is runnable or the
    /// work quantum elapses.
    ///
    /// A primitive failure halts the faulting thread and is returned; the
    /// other threads keep their stacks and stay runnable.
    pub(crate) fn step_threads(
        &self,
        graph: &BlockGraph,
        registry: &Registry,
        threads: &mut [Thread],
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        loop {
            let mut stepped = false;
            for thread in threads.iter_mut() {
                if thread.status() == Status::Running {
                    stepped = true;
                    if let Err(error) = self.step_thread(graph, registry, thread) {
                        thread.halt();
                        return Err(error);
                    }
                }
            }
            if !stepped || started.elapsed() >= self.work_quantum {
                return Ok(());
            }
        }
    }

    /// Dispatch the block on top of the thread's stack and route its
    /// completion.
    pub(crate) fn step_thread(
        &self,
        graph: &BlockGraph,
        registry: &Registry,
        thread: &mut Thread,
    ) -> Result<(), EngineError> {
        if thread.peek_stack().is_none() {
            thread.set_status(Status::Finished);
            return Ok(());
        }
        match dispatch(self, graph, registry, thread)? {
            Dispatch::Suspended | Dispatch::Advanced => {}
            Dispatch::Completed(value) => {
                if thread.pending_input().is_some() {
                    // A resumed input activation finished at the top of the
                    // stack: deliver its value to the parent and pop, instead
                    // of following a `next` pointer it cannot have.
                    thread.push_reported_value(value.unwrap_or(Value::Null));
                    thread.pop_stack();
                } else {
                    self.proceed_thread(graph, thread);
                }
            }
        }
        Ok(())
    }

    /// Pop the completed block and advance to its successor, finishing the
    /// thread when the stack empties.
    pub(crate) fn proceed_thread(&self, graph: &BlockGraph, thread: &mut Thread) {
        if let Some(popped) = thread.pop_stack() {
            if let Some(next) = graph.next_block(&popped) {
                thread.push_stack(next.to_string(), None);
            }
        }
        if thread.peek_stack().is_none() {
            trace!(thread = ?thread.id(), "stack emptied; thread finished");
            thread.set_status(Status::Finished);
        }
    }

    /// Enter branch `index` of the control block on top of the stack. A
    /// missing or empty branch proceeds past the block instead of
    /// re-dispatching it forever.
    pub(crate) fn step_into_substack(&self, graph: &BlockGraph, thread: &mut Thread, index: usize) {
        let Some(current) = thread.peek_stack().map(str::to_string) else {
            return;
        };
        match graph.substack(&current, index) {
            Some(first) => {
                trace!(block = %current, index, "entering substack");
                thread.push_stack(first.to_string(), None);
            }
            None => {
                trace!(block = %current, index, "substack is empty; proceeding");
                self.proceed_thread(graph, thread);
            }
        }
    }
}
