//! The IR pass pipeline (`spec.md` §4.4).
//!
//! Two passes, each run to a fixpoint: inlining pure-constant producers
//! at their use site, and inlining a single-use producer into its one
//! consumer. Mirrors the shape of `wasmi`'s `prepare::compile` pass over
//! already-validated instructions, except both passes here rewrite a
//! dataflow graph rather than a linear instruction stream, so "inline"
//! means "replace a `ValueRef` with an `InputArg::Inline` carrying the
//! producer statement" rather than deleting and re-threading opcodes.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ir::{Function, InputArg, OperandValue, Primitive, Program};

/// Runs the pipeline to a fixpoint on every function in `program`.
pub struct Pipeline;

impl Pipeline {
    pub fn run(program: Program) -> Program {
        match program {
            Program::Single(f) => Program::Single(run_on_function(f)),
            Program::Multi(methods) => {
                Program::Multi(methods.into_iter().map(|(id, f)| (id, run_on_function(f))).collect())
            }
        }
    }
}

fn run_on_function(mut f: Function) -> Function {
    loop {
        let before = f.clone();
        f = inline_consts(f);
        f = inline_prev_single_use(f);
        if f == before {
            return f;
        }
    }
}

/// Inlines every pure-constant producer directly into each of its uses.
/// Unlike single-use inlining, a constant may be duplicated into more
/// than one use site — it has no side effect to preserve evaluation
/// order for (`spec.md` §4.4 step 1, §8 invariant 2).
fn inline_consts(f: Function) -> Function {
    let mut producers: HashMap<String, Primitive> = HashMap::new();
    for stmt in &f.body {
        if stmt.is_pure_const() {
            for id in stmt.output_ids() {
                producers.insert(id.to_string(), stmt.clone());
            }
        }
    }
    if producers.is_empty() {
        return f;
    }

    let mut body = Vec::with_capacity(f.body.len());
    for stmt in f.body {
        // A const producer's own statement is only dropped once its
        // output no longer appears in `result` — a result id has no
        // statement to inline into, so keeping the producer is the only
        // way to leave it with a defining site (`spec.md` §4.4 step 1,
        // §8 invariants 1 and 4).
        if stmt.is_pure_const() && !stmt.output_ids().any(|id| f.result.iter().any(|r| r.id == id)) {
            continue;
        }
        body.push(inline_consts_into(stmt, &producers));
    }
    Function {
        args: f.args,
        body,
        result: f.result,
        asm_tail: f.asm_tail,
        tail_slice_info: f.tail_slice_info,
        decompile_error: f.decompile_error,
        disassemble_error: f.disassemble_error,
    }
}

fn inline_consts_into(mut stmt: Primitive, producers: &HashMap<String, Primitive>) -> Primitive {
    for (_, input) in &mut stmt.inputs {
        inline_arg_const(input, producers);
    }
    for (_, operand) in &mut stmt.operands {
        inline_operand_const(operand, producers);
    }
    stmt
}

fn inline_arg_const(arg: &mut InputArg, producers: &HashMap<String, Primitive>) {
    match arg {
        InputArg::Ref(r) => {
            if let Some(producer) = producers.get(&r.id) {
                *arg = InputArg::Inline(Box::new(producer.clone()));
            }
        }
        InputArg::Inline(inner) => {
            for (_, input) in &mut inner.inputs {
                inline_arg_const(input, producers);
            }
        }
    }
}

fn inline_operand_const(operand: &mut OperandValue, producers: &HashMap<String, Primitive>) {
    match operand {
        OperandValue::Cont(f) => {
            let inlined = inline_consts((**f).clone());
            if inlined != **f {
                *f = Rc::new(inlined);
            }
        }
        OperandValue::ContMap(map) => {
            for (_, f) in map.iter_mut() {
                let inlined = inline_consts((**f).clone());
                if inlined != **f {
                    *f = Rc::new(inlined);
                }
            }
        }
        _ => {}
    }
}

/// Inlines a statement into its sole consumer when every one of its
/// outputs is used exactly once, total (`spec.md` §4.4 step 2). Declines
/// when any output feeds the function's `result` list, a branch
/// argument, or more than one consumer, since inlining there would
/// either duplicate a side-effecting statement or change evaluation
/// order.
fn inline_prev_single_use(f: Function) -> Function {
    let uses = count_uses(&f);
    let mut inlined_away: Vec<bool> = vec![false; f.body.len()];
    let mut body = f.body.clone();

    for idx in 0..body.len() {
        let stmt = &body[idx];
        let eligible = stmt.outputs.len() == 1
            && uses.get(stmt.outputs[0].1.id.as_str()).copied().unwrap_or(0) == 1
            && !f.result.iter().any(|r| r.id == stmt.outputs[0].1.id);
        if !eligible {
            continue;
        }
        let out_id = stmt.outputs[0].1.id.clone();
        let producer = stmt.clone();

        if let Some(consumer_idx) = find_single_consumer(&body, idx, &out_id) {
            let consumer = &mut body[consumer_idx];
            let mut did_inline = false;
            for (_, input) in &mut consumer.inputs {
                if try_inline_single_use(input, &out_id, &producer) {
                    did_inline = true;
                }
            }
            if did_inline {
                inlined_away[idx] = true;
            }
        }
    }

    let new_body: Vec<Primitive> = body
        .into_iter()
        .enumerate()
        .filter_map(|(idx, stmt)| if inlined_away[idx] { None } else { Some(stmt) })
        .collect();

    Function {
        args: f.args,
        body: new_body,
        result: f.result,
        asm_tail: f.asm_tail,
        tail_slice_info: f.tail_slice_info,
        decompile_error: f.decompile_error,
        disassemble_error: f.disassemble_error,
    }
}

fn try_inline_single_use(arg: &mut InputArg, target_id: &str, producer: &Primitive) -> bool {
    match arg {
        InputArg::Ref(r) if r.id == target_id => {
            *arg = InputArg::Inline(Box::new(producer.clone()));
            true
        }
        InputArg::Ref(_) => false,
        InputArg::Inline(inner) => {
            let mut any = false;
            for (_, input) in &mut inner.inputs {
                any |= try_inline_single_use(input, target_id, producer);
            }
            any
        }
    }
}

fn find_single_consumer(body: &[Primitive], producer_idx: usize, id: &str) -> Option<usize> {
    body.iter()
        .enumerate()
        .skip(producer_idx + 1)
        .find(|(_, stmt)| statement_references(stmt, id))
        .map(|(idx, _)| idx)
}

fn statement_references(stmt: &Primitive, id: &str) -> bool {
    stmt.inputs.iter().any(|(_, a)| arg_references(a, id))
}

fn arg_references(arg: &InputArg, id: &str) -> bool {
    match arg {
        InputArg::Ref(r) => r.id == id,
        InputArg::Inline(inner) => inner.inputs.iter().any(|(_, a)| arg_references(a, id)),
    }
}

/// Counts, across the whole function body and its `result` list, how
/// many times each locally-defined id is referenced. Does not recurse
/// into `Cont`/`ContMap` operands — those are independent functions with
/// their own use counts, computed separately when the pipeline recurses
/// into them.
fn count_uses(f: &Function) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for stmt in &f.body {
        for (_, input) in &stmt.inputs {
            count_arg(input, &mut counts);
        }
    }
    for r in &f.result {
        *counts.entry(r.id.clone()).or_insert(0) += 1;
    }
    counts
}

fn count_arg(arg: &InputArg, counts: &mut HashMap<String, usize>) {
    match arg {
        InputArg::Ref(r) => {
            *counts.entry(r.id.clone()).or_insert(0) += 1;
        }
        InputArg::Inline(inner) => {
            for (_, input) in &inner.inputs {
                count_arg(input, counts);
            }
        }
    }
}
