//! The opcode decoder (`spec.md` §4.1).
//!
//! Builds a prefix table from the [`Catalog`] once, then matches the
//! longest known prefix at each instruction boundary, the way a
//! hand-rolled disassembler would, rather than a compiled `match` over a
//! fixed enum (the catalog is runtime data, unlike `wasmi`'s `isa.rs`
//! instruction set).

use std::collections::HashMap;

use crate::catalog::{Catalog, InstructionSpec, OperandKind};
use crate::cell::Slice;
use crate::error::DecodeError;
use crate::ir::OperandValue;

use num_bigint::BigInt;

/// Decodes opcodes against one [`Catalog`].
pub struct Decoder<'c> {
    catalog: &'c Catalog,
    /// Indexed by prefix length; each level maps the bit prefix (as a
    /// `Vec<bool>`) of that length to the specs that declare it.
    by_len: Vec<HashMap<Vec<bool>, Vec<&'c InstructionSpec>>>,
    max_len: usize,
}

impl<'c> Decoder<'c> {
    pub fn new(catalog: &'c Catalog) -> Self {
        let max_len = catalog
            .instructions
            .iter()
            .map(|i| i.prefix.len())
            .max()
            .unwrap_or(0);
        let mut by_len: Vec<HashMap<Vec<bool>, Vec<&'c InstructionSpec>>> =
            (0..=max_len).map(|_| HashMap::new()).collect();
        for spec in &catalog.instructions {
            by_len[spec.prefix.len()]
                .entry(spec.prefix.clone())
                .or_default()
                .push(spec);
        }
        Decoder {
            catalog,
            by_len,
            max_len,
        }
    }

    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Decodes one instruction at the cursor. Advances `cursor` by
    /// exactly the prefix width plus the sum of operand widths on
    /// success.
    pub fn next_instruction(
        &self,
        cursor: &mut Slice,
    ) -> Result<(&'c InstructionSpec, Vec<(String, OperandValue)>), DecodeError> {
        let spec = self.match_prefix(cursor)?;

        let mut operands = Vec::with_capacity(spec.operands.len());
        for decl in &spec.operands {
            let value = load_operand(cursor, decl, &operands)?;
            operands.push((decl.name.clone(), value));
        }
        Ok((spec, operands))
    }

    fn match_prefix(&self, cursor: &mut Slice) -> Result<&'c InstructionSpec, DecodeError> {
        for len in 1..=self.max_len {
            if cursor.remaining_bits() < len {
                continue;
            }
            let bits = peek_bits(cursor, len)?;
            if let Some(candidates) = self.by_len[len].get(&bits) {
                for spec in candidates {
                    if let Some(rc) = &spec.range_check {
                        if cursor.remaining_bits() < len + rc.length as usize {
                            continue;
                        }
                        let mut probe = cursor.clone();
                        probe.skip(len as u32).expect("checked above");
                        let value = probe.load_uint(rc.length, "<range_check>")?;
                        let value = value as i64;
                        if value < rc.from || value > rc.to {
                            continue;
                        }
                    }
                    cursor.skip(len as u32).expect("checked above");
                    return Ok(spec);
                }
            }
        }
        Err(DecodeError::PrefixNotFound)
    }
}

fn peek_bits(cursor: &Slice, len: usize) -> Result<Vec<bool>, DecodeError> {
    let value = cursor.peek_uint(len as u32)?;
    Ok((0..len)
        .rev()
        .map(|i| (value >> i) & 1 == 1)
        .collect())
}

fn find_uint_operand(operands: &[(String, OperandValue)], name: &str) -> Option<i64> {
    operands.iter().find(|(n, _)| n == name).and_then(|(_, v)| {
        if let OperandValue::Int(i) = v {
            Some(*i)
        } else {
            None
        }
    })
}

fn load_operand(
    cursor: &mut Slice,
    decl: &crate::catalog::OperandDecl,
    already_loaded: &[(String, OperandValue)],
) -> Result<OperandValue, DecodeError> {
    match &decl.kind {
        OperandKind::Int(w) => Ok(OperandValue::Int(cursor.load_int(*w, &decl.name)?)),
        OperandKind::UInt(w) => Ok(OperandValue::Int(cursor.load_uint(*w, &decl.name)? as i64)),
        OperandKind::Ref => Ok(OperandValue::Slice(cursor.load_ref(&decl.name)?)),
        OperandKind::LongInt => {
            let len = cursor.load_uint(5, &decl.name)?;
            let width = 8 * len as u32 + 19;
            let raw = load_wide_int(cursor, width, &decl.name)?;
            Ok(OperandValue::BigInt(raw))
        }
        OperandKind::Subslice {
            bits_add,
            bits_len_var,
            refs_add,
            refs_len_var,
            completion_tag,
        } => {
            let extra_bits = match bits_len_var {
                Some(var) => find_uint_operand(already_loaded, var).ok_or_else(|| {
                    DecodeError::OperandLoad {
                        operand: decl.name.clone(),
                        cause: format!("length variable `{var}` not yet loaded"),
                    }
                })?,
                None => 0,
            };
            let extra_refs = match refs_len_var {
                Some(var) => find_uint_operand(already_loaded, var).ok_or_else(|| {
                    DecodeError::OperandLoad {
                        operand: decl.name.clone(),
                        cause: format!("length variable `{var}` not yet loaded"),
                    }
                })?,
                None => 0,
            };
            let bit_len = (*bits_add as i64 + extra_bits).max(0) as usize;
            let ref_len = (*refs_add as i64 + extra_refs).max(0) as usize;
            let slice = cursor.load_subslice(bit_len, ref_len, *completion_tag, &decl.name)?;
            Ok(OperandValue::Slice(slice))
        }
    }
}

/// Reads an arbitrary-width signed integer (used for `long-int`, which
/// can exceed 64 bits), two's-complement, MSB-first.
fn load_wide_int(cursor: &mut Slice, width: u32, name: &str) -> Result<BigInt, DecodeError> {
    if width == 0 {
        return Ok(BigInt::from(0));
    }
    let mut magnitude_bits: Vec<u8> = Vec::with_capacity(width as usize);
    let mut remaining = width;
    // Pull in chunks of up to 63 bits to stay inside load_uint's u64 contract.
    let sign_bit = cursor.peek_uint(1)?;
    while remaining > 0 {
        let take = remaining.min(63);
        let chunk = cursor.load_uint(take, name)?;
        for i in (0..take).rev() {
            magnitude_bits.push(((chunk >> i) & 1) as u8);
        }
        remaining -= take;
    }
    let mut value = BigInt::from(0);
    for bit in &magnitude_bits {
        value = (value << 1) + BigInt::from(*bit);
    }
    if sign_bit == 1 {
        value -= BigInt::from(1) << width;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::catalog::{InstructionSpec, RangeCheck};

    fn bits(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    fn spec(mnemonic: &str, prefix: &str, range_check: Option<RangeCheck>) -> InstructionSpec {
        InstructionSpec {
            mnemonic: mnemonic.into(),
            prefix: bits(prefix),
            range_check,
            operands: Vec::new(),
            category: "opaque".into(),
            value_flow: None,
            control_flow: None,
            shuffle_ops: None,
        }
    }

    #[test]
    fn matches_longest_prefix() {
        let catalog = Catalog::new(vec![spec("SHORT", "10", None), spec("LONG", "1011", None)]);
        let decoder = Decoder::new(&catalog);
        let cell = Cell::new(bits("1011000"), Vec::new());
        let mut cur = Slice::new(cell);
        let (matched, _) = decoder.next_instruction(&mut cur).unwrap();
        assert_eq!(matched.mnemonic, "LONG");
        assert_eq!(cur.remaining_bits(), 3);
    }

    #[test]
    fn range_check_disambiguates_overlap() {
        let rc_low = RangeCheck {
            length: 2,
            from: 0,
            to: 1,
        };
        let rc_high = RangeCheck {
            length: 2,
            from: 2,
            to: 3,
        };
        let catalog = Catalog::new(vec![
            spec("LOW", "1", Some(rc_low)),
            spec("HIGH", "1", Some(rc_high)),
        ]);
        let decoder = Decoder::new(&catalog);

        let cell = Cell::new(bits("111"), Vec::new());
        let mut cur = Slice::new(cell);
        let (matched, _) = decoder.next_instruction(&mut cur).unwrap();
        assert_eq!(matched.mnemonic, "HIGH");
    }

    #[test]
    fn prefix_not_found_errors() {
        let catalog = Catalog::new(vec![spec("ONLY", "1111", None)]);
        let decoder = Decoder::new(&catalog);
        let cell = Cell::new(bits("0000"), Vec::new());
        let mut cur = Slice::new(cell);
        assert_eq!(
            decoder.next_instruction(&mut cur).unwrap_err(),
            DecodeError::PrefixNotFound
        );
    }
}
