//! The entry heuristic (`spec.md` §4.5).
//!
//! A contract's code cell is, in the common case, not a single linear
//! function but a dispatch table: the exact four-instruction prologue
//! `SET_CODEPAGE; DICT_PUSH_CONST(n, d); DICT_I_GET_JMP_Z; THROW_ARG`,
//! where `d` is a `HashmapE` dictionary keyed by a signed `n`-bit
//! method id, one leaf per exported method. This module decodes those
//! four instructions off the root slice via the catalog and, only when
//! every mnemonic matches in order and nothing is left over, walks `d`
//! and lifts every leaf instead of the raw top-level bytes. Any
//! deviation — wrong mnemonic, a decode failure, leftover bits or
//! refs, a malformed dictionary — falls back to lifting the root slice
//! directly, the same "best-effort, never hard-fail" posture the
//! lifter itself takes (`spec.md` §7).
//!
//! There is no dictionary-aware type in the retrieval pack to ground
//! the `HashmapE` walk on; the label encoding below (`hml_short$0` /
//! `hml_long$10` / `hml_same$11`) is the publicly documented TVM
//! format, not copied from any file in this workspace.

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::cell::Slice;
use crate::decoder::Decoder;
use crate::ir::{Function, OperandValue, Program};
use crate::lifter::Lifter;

/// Lifts a root code slice into a [`Program`], preferring a recognized
/// method-dispatch prologue over a single flat function.
pub fn lift_program(catalog: &Catalog, root: Slice) -> Program {
    match try_method_dictionary(catalog, root.clone()) {
        Some(entries) if !entries.is_empty() => {
            let mut methods = BTreeMap::new();
            for (id, leaf) in entries {
                let mut lifter = Lifter::new(catalog);
                methods.insert(id, lifter.lift_slice(leaf));
            }
            Program::Multi(methods)
        }
        _ => {
            let mut lifter = Lifter::new(catalog);
            Program::Single(lifter.lift_slice(root))
        }
    }
}

/// Attempts to decode `SET_CODEPAGE; DICT_PUSH_CONST(n, d);
/// DICT_I_GET_JMP_Z; THROW_ARG` off `root` with nothing left over, then
/// walk `d` as an `n`-bit-keyed `HashmapE`. Returns `None` on any
/// mismatch (wrong mnemonic, decode failure, leftover bits/refs, or a
/// malformed dictionary) — the caller then falls back to treating
/// `root` as one flat function. A well-formed but empty dictionary is
/// reported as `Some(vec![])`, which the caller also treats as "prefer
/// the fallback" (see `lift_program`).
fn try_method_dictionary(catalog: &Catalog, root: Slice) -> Option<Vec<(i64, Slice)>> {
    let decoder = Decoder::new(catalog);
    let mut cursor = root;

    let (set_codepage, _) = decoder.next_instruction(&mut cursor).ok()?;
    if set_codepage.mnemonic != "SET_CODEPAGE" {
        return None;
    }
    let (dict_push_const, operands) = decoder.next_instruction(&mut cursor).ok()?;
    if dict_push_const.mnemonic != "DICT_PUSH_CONST" {
        return None;
    }
    let (dict_get_jmp_z, _) = decoder.next_instruction(&mut cursor).ok()?;
    if dict_get_jmp_z.mnemonic != "DICT_I_GET_JMP_Z" {
        return None;
    }
    let (throw_arg, _) = decoder.next_instruction(&mut cursor).ok()?;
    if throw_arg.mnemonic != "THROW_ARG" {
        return None;
    }
    if cursor.remaining_bits() != 0 || cursor.remaining_refs() != 0 {
        return None;
    }

    let n = find_int_operand(&operands, "n")?;
    let n = u32::try_from(n).ok()?;
    let d = match find_operand(&operands, "d")? {
        OperandValue::Slice(s) => s.clone(),
        _ => return None,
    };

    let mut entries = Vec::new();
    walk_hashmap_node(d, n, Vec::new(), &mut entries)?;
    Some(entries)
}

fn find_operand<'a>(operands: &'a [(String, OperandValue)], name: &str) -> Option<&'a OperandValue> {
    operands.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

fn find_int_operand(operands: &[(String, OperandValue)], name: &str) -> Option<i64> {
    match find_operand(operands, name)? {
        OperandValue::Int(i) => Some(*i),
        _ => None,
    }
}

/// Walks one `HashmapNode`, accumulating the key bits seen so far along
/// this path. `n` is the number of key bits still undetermined at this
/// node.
fn walk_hashmap_node(
    mut node: Slice,
    n: u32,
    mut key_bits: Vec<bool>,
    out: &mut Vec<(i64, Slice)>,
) -> Option<()> {
    let label = read_label(&mut node, n)?;
    key_bits.extend(label.iter().copied());
    let remaining = n.checked_sub(label.len() as u32)?;

    if remaining == 0 {
        out.push((key_bits_to_i64(&key_bits), node));
        return Some(());
    }

    let left = node.load_ref("hmn_left").ok()?;
    let right = node.load_ref("hmn_right").ok()?;

    let mut left_key = key_bits.clone();
    left_key.push(false);
    walk_hashmap_node(left, remaining - 1, left_key, out)?;

    let mut right_key = key_bits;
    right_key.push(true);
    walk_hashmap_node(right, remaining - 1, right_key, out)?;

    Some(())
}

/// Reads one `HmLabel`, returning its bits (possibly empty).
fn read_label(cursor: &mut Slice, m: u32) -> Option<Vec<bool>> {
    let tag0 = cursor.load_uint(1, "hml_tag0").ok()?;
    if tag0 == 0 {
        // hml_short$0: unary length `n` followed by `n` literal bits.
        let n = read_unary(cursor)?;
        if n > m {
            return None;
        }
        read_bits(cursor, n)
    } else {
        let tag1 = cursor.load_uint(1, "hml_tag1").ok()?;
        let width = bit_width_for(m);
        if tag1 == 0 {
            // hml_long$10: explicit length in `bit_width_for(m)` bits.
            let n = cursor.load_uint(width, "hml_long_len").ok()? as u32;
            if n > m {
                return None;
            }
            read_bits(cursor, n)
        } else {
            // hml_same$11: one repeated bit, length in `bit_width_for(m)` bits.
            let bit = cursor.load_uint(1, "hml_same_bit").ok()? == 1;
            let n = cursor.load_uint(width, "hml_same_len").ok()? as u32;
            if n > m {
                return None;
            }
            Some(vec![bit; n as usize])
        }
    }
}

/// `ceil(log2(m + 1))`, the width TL-B's `#<= m` uses to store a length
/// that can range from `0` to `m` inclusive.
fn bit_width_for(m: u32) -> u32 {
    let mut width = 0;
    while (1u64 << width) <= m as u64 {
        width += 1;
    }
    width
}

fn read_unary(cursor: &mut Slice) -> Option<u32> {
    let mut n = 0;
    loop {
        if cursor.load_uint(1, "unary_bit").ok()? == 0 {
            return Some(n);
        }
        n += 1;
        if n > 1024 {
            return None; // defend against a corrupt, never-terminating unary code
        }
    }
}

fn read_bits(cursor: &mut Slice, n: u32) -> Option<Vec<bool>> {
    let mut bits = Vec::with_capacity(n as usize);
    for _ in 0..n {
        bits.push(cursor.load_uint(1, "label_bit").ok()? == 1);
    }
    Some(bits)
}

fn key_bits_to_i64(bits: &[bool]) -> i64 {
    let mut value: i64 = 0;
    for &b in bits {
        value = (value << 1) | (b as i64);
    }
    if let Some(&true) = bits.first() {
        value -= 1i64 << bits.len();
    }
    value
}

/// A decompiled program ready to render (`spec.md` §4.5, §6).
pub fn method_count(program: &Program) -> usize {
    match program {
        Program::Single(_) => 1,
        Program::Multi(methods) => methods.len(),
    }
}

#[allow(dead_code)]
fn single_function(program: &Program) -> Option<&Function> {
    match program {
        Program::Single(f) => Some(f),
        Program::Multi(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        Catalog, ControlFlow, InstructionSpec, OperandDecl, OperandKind, StackOutputEntry, StackType,
        ValueFlow,
    };
    use crate::cell::Cell;

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    fn uint_bits(value: u64, width: u32) -> Vec<bool> {
        (0..width).rev().map(|i| (value >> i) & 1 == 1).collect()
    }

    fn plain_spec(mnemonic: &str, prefix: &str) -> InstructionSpec {
        InstructionSpec {
            mnemonic: mnemonic.into(),
            prefix: bits(prefix),
            range_check: None,
            operands: Vec::new(),
            category: "opaque".into(),
            value_flow: None,
            control_flow: None,
            shuffle_ops: None,
        }
    }

    fn dict_push_const_spec(prefix: &str) -> InstructionSpec {
        InstructionSpec {
            mnemonic: "DICT_PUSH_CONST".into(),
            prefix: bits(prefix),
            range_check: None,
            operands: vec![
                OperandDecl {
                    name: "n".into(),
                    kind: OperandKind::UInt(8),
                    display_hint: None,
                },
                OperandDecl {
                    name: "d".into(),
                    kind: OperandKind::Ref,
                    display_hint: None,
                },
            ],
            category: "dict".into(),
            value_flow: None,
            control_flow: None,
            shuffle_ops: None,
        }
    }

    fn dispatch_catalog() -> Catalog {
        Catalog::new(vec![
            plain_spec("SET_CODEPAGE", "0000"),
            dict_push_const_spec("0001"),
            plain_spec("DICT_I_GET_JMP_Z", "0010"),
            plain_spec("THROW_ARG", "0011"),
        ])
    }

    fn dispatch_catalog_with_pushint() -> Catalog {
        let mut instructions = dispatch_catalog().instructions;
        instructions.push(InstructionSpec {
            mnemonic: "PUSHINT".into(),
            prefix: bits("1010"),
            range_check: None,
            operands: vec![OperandDecl {
                name: "x".into(),
                kind: OperandKind::Int(8),
                display_hint: None,
            }],
            category: "const_int".into(),
            value_flow: Some(ValueFlow {
                inputs: vec![],
                outputs: vec![StackOutputEntry::Const { ty: StackType::Int }],
            }),
            control_flow: Some(ControlFlow {
                branches: vec![],
                nobranch: true,
            }),
            shuffle_ops: None,
        });
        Catalog::new(instructions)
    }

    #[test]
    fn wrong_mnemonic_falls_back_to_single() {
        let catalog = dispatch_catalog();
        // SET_CODEPAGE matches, but the next 4 bits don't match
        // DICT_PUSH_CONST's prefix.
        let cell = Cell::new(bits("00000011"), Vec::new());
        let program = lift_program(&catalog, Slice::new(cell));
        assert_eq!(method_count(&program), 1);
        assert!(matches!(program, Program::Single(_)));
    }

    #[test]
    fn leftover_bits_after_prologue_falls_back_to_single() {
        let catalog = dispatch_catalog();
        let node = Cell::new(bits("11").into_iter().chain(bits("0")).chain(uint_bits(0, 1)).collect(), Vec::new());

        let mut root_bits = bits("0000"); // SET_CODEPAGE
        root_bits.extend(bits("0001")); // DICT_PUSH_CONST
        root_bits.extend(uint_bits(1, 8)); // n = 1
        root_bits.extend(bits("0010")); // DICT_I_GET_JMP_Z
        root_bits.extend(bits("0011")); // THROW_ARG
        root_bits.extend(bits("1")); // leftover bit -> not an exact match

        let cell = Cell::new(root_bits, vec![node]);
        let program = lift_program(&catalog, Slice::new(cell));
        assert_eq!(method_count(&program), 1);
        assert!(matches!(program, Program::Single(_)));
    }

    #[test]
    fn exact_prologue_dispatches_to_method_dictionary() {
        let catalog = dispatch_catalog_with_pushint();

        // dictionary node: one hml_same$11 edge covering the whole
        // 1-bit key space (repeated bit = 0, length = 1), followed
        // directly by the leaf's own code (PUSHINT 9) inlined in the
        // same cell.
        let mut node_bits = bits("11");
        node_bits.push(false); // repeated bit value
        node_bits.extend(uint_bits(1, bit_width_for(1))); // length = 1
        node_bits.extend(bits("1010"));
        node_bits.extend(bits("00001001"));
        let node = Cell::new(node_bits, Vec::new());

        let mut root_bits = bits("0000"); // SET_CODEPAGE
        root_bits.extend(bits("0001")); // DICT_PUSH_CONST
        root_bits.extend(uint_bits(1, 8)); // n = 1
        root_bits.extend(bits("0010")); // DICT_I_GET_JMP_Z
        root_bits.extend(bits("0011")); // THROW_ARG
        let root_cell = Cell::new(root_bits, vec![node]);

        let program = lift_program(&catalog, Slice::new(root_cell));
        match program {
            Program::Multi(methods) => {
                assert_eq!(methods.len(), 1);
                let f = methods.get(&0).expect("method id 0");
                assert_eq!(f.body.len(), 1);
                assert_eq!(f.body[0].mnemonic, "PUSHINT");
            }
            Program::Single(_) => panic!("expected a recognized dictionary"),
        }
    }
}
