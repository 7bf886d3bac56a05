//! Standard operator and control-flow primitives.
//!
//! These are ordinary registry entries registered by [`Registry::standard`];
//! embedders can replace or extend them through the same
//! [`Registry::register`] API the engine's tests use.

use std::cmp::Ordering;
use std::time::Duration;

use crate::registry::{Arguments, BlockResult, Capabilities, Registry};
use crate::value::Value;

/// Execution-context slot holding a repeat block's remaining iterations.
const LOOP_COUNTER: &str = "loop_counter";

/// Execution-context slot marking that a conditional already ran its branch
/// for the current pass.
const BRANCH_TAKEN: &str = "branch_taken";

/// Register the standard opcode set.
pub fn register_standard(registry: &mut Registry) {
    registry.register("operator_add", |args, _| num_op(args, |a, b| a + b));
    registry.register("operator_subtract", |args, _| num_op(args, |a, b| a - b));
    registry.register("operator_multiply", |args, _| num_op(args, |a, b| a * b));
    registry.register("operator_divide", |args, _| num_op(args, |a, b| a / b));
    registry.register("operator_equals", |args, _| {
        let (a, b) = operands(args);
        Ok(Some(Value::Boolean(loosely_equal(&a, &b))))
    });
    registry.register("operator_gt", |args, _| compare(args, Ordering::is_gt));
    registry.register("operator_lt", |args, _| compare(args, Ordering::is_lt));
    registry.register("operator_and", |args, _| {
        Ok(Some(Value::Boolean(
            args.boolean("OPERAND1") && args.boolean("OPERAND2"),
        )))
    });
    registry.register("operator_or", |args, _| {
        Ok(Some(Value::Boolean(
            args.boolean("OPERAND1") || args.boolean("OPERAND2"),
        )))
    });
    registry.register("operator_not", |args, _| {
        Ok(Some(Value::Boolean(!args.boolean("OPERAND"))))
    });
    registry.register("io_print", |args, _| {
        println!("{}", args.string("MESSAGE"));
        Ok(None)
    });
    registry.register("control_wait", control_wait);
    registry.register("control_repeat", control_repeat);
    registry.register("control_forever", |_, caps| {
        caps.enter_substack(1);
        Ok(None)
    });
    registry.register("control_if", control_if);
    registry.register("control_if_else", control_if_else);
}

/// Numeric binary operation over NUM1/NUM2.
fn num_op(args: &Arguments, op: fn(f64, f64) -> f64) -> BlockResult {
    Ok(Some(Value::Number(op(
        args.number("NUM1"),
        args.number("NUM2"),
    ))))
}

fn operands(args: &Arguments) -> (Value, Value) {
    (
        args.get("OPERAND1").cloned().unwrap_or_default(),
        args.get("OPERAND2").cloned().unwrap_or_default(),
    )
}

/// A value's numeric reading, when it has one.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality the way block programs expect: numeric when both operands read
/// as numbers, otherwise by string form.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a.to_string_value() == b.to_string_value(),
    }
}

/// Ordering comparison over OPERAND1/OPERAND2, numeric when possible.
fn compare(args: &Arguments, pred: fn(Ordering) -> bool) -> BlockResult {
    let (a, b) = operands(args);
    let ordering = match (numeric(&a), numeric(&b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => a.to_string_value().cmp(&b.to_string_value()),
    };
    Ok(Some(Value::Boolean(pred(ordering))))
}

/// `control_wait` parks the thread and schedules completion after DURATION
/// seconds.
fn control_wait(args: &Arguments, caps: &mut Capabilities) -> BlockResult {
    let seconds = args.number("DURATION").max(0.0);
    caps.suspend();
    caps.set_timeout(Duration::from_secs_f64(seconds));
    Ok(None)
}

/// `control_repeat` runs its branch TIMES times, keeping the remaining count
/// in the execution context across re-activations.
fn control_repeat(args: &Arguments, caps: &mut Capabilities) -> BlockResult {
    let remaining = match caps.context().get(LOOP_COUNTER) {
        Some(value) => value.to_number(),
        None => args.number("TIMES"),
    };
    if remaining >= 1.0 {
        caps.context_mut()
            .set(LOOP_COUNTER, Value::Number(remaining - 1.0));
        caps.enter_substack(1);
    }
    Ok(None)
}

/// `control_if` runs its branch once when CONDITION holds.
fn control_if(args: &Arguments, caps: &mut Capabilities) -> BlockResult {
    if caps.context_mut().remove(BRANCH_TAKEN).is_some() {
        // The branch already ran; this re-activation completes the block.
        return Ok(None);
    }
    if args.boolean("CONDITION") {
        caps.context_mut().set(BRANCH_TAKEN, Value::Boolean(true));
        caps.enter_substack(1);
    }
    Ok(None)
}

/// `control_if_else` runs branch 1 when CONDITION holds, branch 2 otherwise.
fn control_if_else(args: &Arguments, caps: &mut Capabilities) -> BlockResult {
    if caps.context_mut().remove(BRANCH_TAKEN).is_some() {
        return Ok(None);
    }
    caps.context_mut().set(BRANCH_TAKEN, Value::Boolean(true));
    if args.boolean("CONDITION") {
        caps.enter_substack(1);
    } else {
        caps.enter_substack(2);
    }
    Ok(None)
}
