//! The block-evaluation dispatcher.
//!
//! Computes the output of the block on top of a thread's stack, recursively
//! resolving its argument sub-expressions first. Evaluation of an input may
//! suspend the whole chain; the stack is left exactly where it was, and a
//! later re-entry replays the resolver, serving inputs that already
//! completed from the activation's reported cache so no side effect runs
//! twice.

use tracing::{debug, trace, warn};

use crate::error::EngineError;
use crate::graph::BlockGraph;
use crate::registry::{Arguments, Capabilities, Registry};
use crate::scheduler::Scheduler;
use crate::thread::{Status, Thread};
use crate::value::Value;

/// Outcome of dispatching the block on top of a thread's stack.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// The activation finished; reporters carry their value.
    Completed(Option<Value>),
    /// The handler advanced the stack itself (substack entry); the caller
    /// must not pop or proceed.
    Advanced,
    /// Evaluation is incomplete. The stack is untouched and the thread is
    /// parked until an external completion or timeout.
    Suspended,
}

/// Evaluate the block on top of `thread`'s stack.
///
/// Resolves the block's literal fields and inputs into an argument map,
/// recursing into input sub-blocks, then invokes the opcode's handler
/// exactly once for this activation. A suspension anywhere below aborts the
/// pass without popping anything.
pub(crate) fn dispatch(
    scheduler: &Scheduler,
    graph: &BlockGraph,
    registry: &Registry,
    thread: &mut Thread,
) -> Result<Dispatch, EngineError> {
    let Some(current_id) = thread.peek_stack().map(str::to_string) else {
        return Ok(Dispatch::Completed(None));
    };
    let Some(block) = graph.block(&current_id) else {
        warn!(block = %current_id, "block is not in the graph");
        return Ok(Dispatch::Completed(None));
    };

    // Literal fields first. They are constants, read fresh from the graph on
    // every activation and never cached.
    let mut args = Arguments::new();
    for (name, value) in graph.fields(&current_id) {
        args.insert(name, value.clone());
    }

    // Resolve inputs, recursing into sub-blocks.
    for (input_name, child_id) in graph.inputs(&current_id) {
        // A value computed by an earlier pass of this activation?
        if let Some(value) = thread.peek_frame().and_then(|frame| frame.reported(input_name)) {
            trace!(input = input_name, "serving input from reported cache");
            let value = value.clone();
            args.insert(input_name, value);
            continue;
        }

        thread.push_stack(child_id.to_string(), Some(input_name.to_string()));
        match dispatch(scheduler, graph, registry, thread)? {
            Dispatch::Suspended => {
                // Leave our own entry and the pending input's in place; the
                // resolver replays from the cache on re-entry.
                return Ok(Dispatch::Suspended);
            }
            Dispatch::Completed(value) => {
                thread.pop_stack();
                let value = value.unwrap_or(Value::Null);
                // Cache every completed input, so a suspension in a later
                // sibling cannot re-run this one's side effects on re-entry.
                if let Some(frame) = thread.peek_frame_mut() {
                    frame.cache_reported(input_name, value.clone());
                }
                args.insert(input_name, value);
            }
            Dispatch::Advanced => {
                // enter_substack is ignored for input activations, so a
                // recursive dispatch never advances the stack.
            }
        }
    }

    let opcode = block.opcode();
    if opcode.is_empty() {
        warn!(block = %current_id, "block has no opcode");
        return Ok(Dispatch::Completed(None));
    }
    let Some(handler) = registry.handler_for(opcode) else {
        warn!(%opcode, block = %current_id, "no handler registered for opcode");
        return Ok(Dispatch::Completed(None));
    };

    debug!(%opcode, args = args.len(), "invoking primitive");

    // Hand the frame's execution context to the handler through the
    // capability value, and restore it before acting on the result.
    let context = thread
        .peek_frame_mut()
        .map(|frame| frame.take_context())
        .unwrap_or_default();
    let mut caps = Capabilities::new(context);
    let result = handler(&args, &mut caps);
    let (context, requests) = caps.finish();
    if let Some(frame) = thread.peek_frame_mut() {
        frame.put_context(context);
    }
    let returned = result?;

    if requests.suspend || requests.timeout.is_some() {
        if let Some(delay) = requests.timeout {
            thread.register_timeout(delay);
        }
        if requests.reported.is_some() {
            debug!(%opcode, "ignoring reported value on a suspending activation");
        }
        thread.set_status(Status::Suspended);
        trace!(%opcode, depth = thread.stack_depth(), "activation suspended");
        return Ok(Dispatch::Suspended);
    }

    // The activation is completing one way or another; its cached input
    // values must not leak into the next activation of this block.
    if let Some(frame) = thread.peek_frame_mut() {
        frame.clear_reported();
    }

    if let Some(index) = requests.substack {
        if thread.pending_input().is_some() {
            warn!(%opcode, "enter_substack from an input activation is ignored");
        } else {
            scheduler.step_into_substack(graph, thread, index);
            return Ok(Dispatch::Advanced);
        }
    }

    if let Some(value) = requests.reported {
        trace!(%opcode, "reported synchronously");
        return Ok(Dispatch::Completed(Some(value)));
    }
    if requests.done {
        return Ok(Dispatch::Completed(None));
    }
    Ok(Dispatch::Completed(returned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Block;
    use crate::thread::ThreadId;

    #[test]
    fn test_nested_inputs_resolve_depth_first() {
        let mut graph = BlockGraph::new();
        graph.insert(
            "outer",
            Block::new("operator_add")
                .with_input("NUM1", "inner")
                .with_field("NUM2", Value::Number(1.0)),
        );
        graph.insert(
            "inner",
            Block::new("operator_add")
                .with_field("NUM1", Value::Number(2.0))
                .with_field("NUM2", Value::Number(3.0)),
        );

        let scheduler = Scheduler::new();
        let registry = Registry::standard();
        let mut thread = Thread::new(ThreadId(0), "outer".to_string());

        let outcome = dispatch(&scheduler, &graph, &registry, &mut thread).unwrap();
        assert!(matches!(outcome, Dispatch::Completed(Some(Value::Number(n))) if n == 6.0));
        assert_eq!(thread.stack_depth(), 1);
    }

    #[test]
    fn test_suspension_leaves_stack_in_place() {
        let mut graph = BlockGraph::new();
        graph.insert("outer", Block::new("operator_add").with_input("NUM1", "inner"));
        graph.insert("inner", Block::new("parked"));

        let mut registry = Registry::standard();
        registry.register("parked", |_, caps| {
            caps.suspend();
            Ok(None)
        });

        let scheduler = Scheduler::new();
        let mut thread = Thread::new(ThreadId(0), "outer".to_string());

        let outcome = dispatch(&scheduler, &graph, &registry, &mut thread).unwrap();
        assert!(matches!(outcome, Dispatch::Suspended));
        assert_eq!(thread.status(), Status::Suspended);
        assert_eq!(thread.stack_depth(), 2);
        assert_eq!(thread.peek_stack(), Some("inner"));
    }

    #[test]
    fn test_cached_input_skips_recursion() {
        let mut graph = BlockGraph::new();
        graph.insert(
            "outer",
            Block::new("operator_add")
                .with_input("NUM1", "inner")
                .with_field("NUM2", Value::Number(3.0)),
        );
        graph.insert("inner", Block::new("explodes"));

        let mut registry = Registry::standard();
        registry.register("explodes", |_, _| {
            Err(EngineError::primitive("explodes", "should not run"))
        });

        let scheduler = Scheduler::new();
        let mut thread = Thread::new(ThreadId(0), "outer".to_string());
        thread
            .peek_frame_mut()
            .unwrap()
            .cache_reported("NUM1", Value::Number(7.0));

        let outcome = dispatch(&scheduler, &graph, &registry, &mut thread).unwrap();
        assert!(matches!(outcome, Dispatch::Completed(Some(Value::Number(n))) if n == 10.0));
    }

    #[test]
    fn test_unknown_opcode_completes_without_value() {
        let mut graph = BlockGraph::new();
        graph.insert("odd", Block::new("no_such_opcode"));

        let scheduler = Scheduler::new();
        let registry = Registry::standard();
        let mut thread = Thread::new(ThreadId(0), "odd".to_string());

        let outcome = dispatch(&scheduler, &graph, &registry, &mut thread).unwrap();
        assert!(matches!(outcome, Dispatch::Completed(None)));
        assert_eq!(thread.status(), Status::Running);
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut graph = BlockGraph::new();
        graph.insert("bad", Block::new("faulty"));

        let mut registry = Registry::new();
        registry.register("faulty", |_, _| Err(EngineError::primitive("faulty", "boom")));

        let scheduler = Scheduler::new();
        let mut thread = Thread::new(ThreadId(0), "bad".to_string());

        let result = dispatch(&scheduler, &graph, &registry, &mut thread);
        assert!(matches!(result, Err(EngineError::Primitive { .. })));
    }

    #[test]
    fn test_reported_cache_cleared_on_completion() {
        let mut graph = BlockGraph::new();
        graph.insert(
            "outer",
            Block::new("operator_add").with_input("NUM1", "inner"),
        );
        graph.insert(
            "inner",
            Block::new("operator_add").with_field("NUM1", Value::Number(5.0)),
        );

        let scheduler = Scheduler::new();
        let registry = Registry::standard();
        let mut thread = Thread::new(ThreadId(0), "outer".to_string());

        dispatch(&scheduler, &graph, &registry, &mut thread).unwrap();
        assert_eq!(thread.peek_frame().unwrap().reported("NUM1"), None);
    }
}
