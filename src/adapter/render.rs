//! Pretty-printing a decompiled [`Program`] as indented pseudo-code.
//!
//! Purely textual; nothing here feeds back into the pipeline. A
//! `Function`'s body is rendered as one assignment per statement
//! (`spec.md` §6), inline expressions are rendered as nested calls, and
//! a method dictionary renders each entry under its signed method id in
//! ascending order (`Program::Multi` already keeps a `BTreeMap`, so no
//! explicit sort is needed here).

use std::fmt::Write as _;

use crate::ir::{Function, InputArg, OperandValue, Primitive, Program, RawInstruction};

/// Renders a full program to pseudo-code text.
pub fn render_program(program: &Program) -> String {
    let mut out = String::new();
    match program {
        Program::Single(f) => render_function(&mut out, "main", f),
        Program::Multi(methods) => {
            for (id, f) in methods {
                render_function(&mut out, &format!("method_{id}"), f);
                out.push('\n');
            }
        }
    }
    out
}

fn render_function(out: &mut String, name: &str, f: &Function) {
    let args: Vec<String> = f.args.iter().map(|a| a.id.clone()).collect();
    let _ = writeln!(out, "fn {name}({}) {{", args.join(", "));

    for stmt in &f.body {
        let _ = writeln!(out, "    {}", render_statement(stmt));
    }

    if !f.result.is_empty() {
        let results: Vec<String> = f.result.iter().map(|r| r.id.clone()).collect();
        let _ = writeln!(out, "    return {};", results.join(", "));
    }

    if let Some(err) = &f.decompile_error {
        let _ = writeln!(out, "    // decompile error: {err}");
    }

    for raw in &f.asm_tail {
        let _ = writeln!(out, "    {}", render_raw(raw));
    }

    if let Some(err) = &f.disassemble_error {
        let _ = writeln!(out, "    // disassemble error: {err}");
        if let Some(tail) = &f.tail_slice_info {
            let _ = writeln!(
                out,
                "    // undecoded tail: {} bits, {} refs",
                tail.remaining_bits, tail.remaining_refs
            );
        }
    }

    let _ = writeln!(out, "}}");
}

fn render_statement(stmt: &Primitive) -> String {
    let outs: Vec<String> = stmt.outputs.iter().map(|(_, d)| d.id.clone()).collect();
    let call = render_call(stmt);
    if outs.is_empty() {
        format!("{call};")
    } else {
        format!("{} = {call};", outs.join(", "))
    }
}

fn render_call(stmt: &Primitive) -> String {
    let mut parts: Vec<String> = stmt.inputs.iter().map(|(_, a)| render_arg(a)).collect();
    parts.extend(stmt.operands.iter().map(|(_, v)| render_operand(v)));
    format!("{}({})", stmt.mnemonic, parts.join(", "))
}

fn render_arg(arg: &InputArg) -> String {
    match arg {
        InputArg::Ref(r) => r.id.clone(),
        InputArg::Inline(p) => render_call(p),
    }
}

fn render_operand(value: &OperandValue) -> String {
    match value {
        OperandValue::Int(i) => i.to_string(),
        OperandValue::BigInt(i) => i.to_string(),
        OperandValue::Bool(b) => b.to_string(),
        OperandValue::Slice(_) => "<slice>".to_string(),
        OperandValue::Cell(_) => "<cell>".to_string(),
        OperandValue::Cont(f) => render_inline_continuation(f),
        OperandValue::ContMap(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(id, f)| format!("{id}: {}", render_inline_continuation(f)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        OperandValue::Other(s) => s.clone(),
    }
}

fn render_inline_continuation(f: &Function) -> String {
    let mut nested = String::new();
    render_function(&mut nested, "cont", f);
    // indent every line of the nested rendering so it reads as a block
    // inside the call it's an operand of.
    nested
        .lines()
        .map(|line| format!("\n        {line}"))
        .collect::<String>()
}

fn render_raw(raw: &RawInstruction) -> String {
    let operands: Vec<String> = raw.operands.iter().map(|(_, v)| render_operand(v)).collect();
    format!("{}({});", raw.mnemonic, operands.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, InputArg, ValueDef, ValueRef};

    #[test]
    fn renders_args_body_and_result() {
        let mut f = Function::new();
        f.args.push(ValueDef::new("arg0"));
        let mut add = Primitive::new("ADD", "arithmetic");
        add.inputs.push(("x".into(), InputArg::Ref(ValueRef::new("arg0"))));
        add.inputs.push(("y".into(), InputArg::Ref(ValueRef::new("arg0"))));
        add.outputs.push(("z".into(), ValueDef::new("var0")));
        f.body.push(add);
        f.result.push(ValueRef::new("var0"));

        let program = Program::Single(f);
        let text = render_program(&program);
        assert!(text.contains("fn main(arg0) {"));
        assert!(text.contains("var0 = ADD(arg0, arg0);"));
        assert!(text.contains("return var0;"));
    }

    #[test]
    fn renders_multi_methods_in_ascending_order() {
        let mut methods = std::collections::BTreeMap::new();
        methods.insert(5, Function::new());
        methods.insert(-1, Function::new());
        let program = Program::Multi(methods);
        let text = render_program(&program);
        let pos_neg = text.find("method_-1").unwrap();
        let pos_five = text.find("method_5").unwrap();
        assert!(pos_neg < pos_five);
    }

    #[test]
    fn renders_disassemble_error_and_tail() {
        let mut f = Function::new();
        f.disassemble_error = Some("no instruction prefix matched".into());
        f.tail_slice_info = Some(crate::ir::TailSliceInfo {
            remaining_bits: 3,
            remaining_refs: 0,
        });
        let text = render_program(&Program::Single(f));
        assert!(text.contains("disassemble error"));
        assert!(text.contains("3 bits, 0 refs"));
    }
}
