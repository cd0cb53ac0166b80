//! A minimal, from-scratch "bag of cells"-style container deserializer.
//!
//! This is not a real BOC parser — there is no checksum, no cell-index
//! compaction scheme, none of the pruned/library/merkle cell variants a
//! production container format supports. It exists only to give the CLI
//! binary a way to turn a file's bytes into the root
//! [`crate::cell::Slice`] the core pipeline expects, the way a real
//! embedder would hand it a root slice after deserializing with a real
//! container library. Layout (all integers big-endian):
//!
//! ```text
//! u32          cell_count
//! cell_count * {
//!     u16      bit_len
//!     ceil(bit_len / 8) bytes   bit data, MSB-first, zero-padded
//!     u8       ref_count
//!     ref_count * u32           indices into this same table
//! }
//! u32          root_index
//! ```
//!
//! Cells are stored such that every reference index is strictly greater
//! than its own index, so the table can be built back-to-front in one
//! pass with no forward-reference patching.

use core::fmt;
use std::rc::Rc;

use crate::cell::{Cell, Slice};

/// Failure to parse a byte buffer as this crate's toy container format.
#[derive(Debug, Clone, PartialEq)]
pub enum BocError {
    /// The buffer ended before a length-prefixed field could be read.
    Truncated { expected: usize, context: &'static str },
    /// A cell's reference index did not point strictly forward.
    BadReference { cell_index: u32, ref_index: u32 },
    /// The root index named a cell outside the table.
    RootOutOfRange { root_index: u32, cell_count: u32 },
}

impl fmt::Display for BocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BocError::Truncated { expected, context } => {
                write!(f, "truncated container: need {expected} more bytes for {context}")
            }
            BocError::BadReference { cell_index, ref_index } => write!(
                f,
                "cell {cell_index} references {ref_index}, which is not strictly forward"
            ),
            BocError::RootOutOfRange { root_index, cell_count } => write!(
                f,
                "root index {root_index} out of range for {cell_count} cells"
            ),
        }
    }
}

impl std::error::Error for BocError {}

/// Parses `bytes` and returns a cursor over the root cell.
pub fn deserialize(bytes: &[u8]) -> Result<Slice, BocError> {
    let mut cursor = ByteCursor::new(bytes);
    let cell_count = cursor.read_u32("cell_count")?;

    struct RawCell {
        bits: Vec<bool>,
        ref_indices: Vec<u32>,
    }

    let mut raw = Vec::with_capacity(cell_count as usize);
    for _ in 0..cell_count {
        let bit_len = cursor.read_u16("bit_len")? as usize;
        let byte_len = (bit_len + 7) / 8;
        let data = cursor.read_bytes(byte_len, "bit data")?;
        let bits = unpack_bits(data, bit_len);

        let ref_count = cursor.read_u8("ref_count")?;
        let mut ref_indices = Vec::with_capacity(ref_count as usize);
        for _ in 0..ref_count {
            ref_indices.push(cursor.read_u32("ref index")?);
        }
        raw.push(RawCell { bits, ref_indices });
    }

    let root_index = cursor.read_u32("root_index")?;
    if root_index >= cell_count {
        return Err(BocError::RootOutOfRange { root_index, cell_count });
    }

    // Build back-to-front: every ref_index must be > its own index, so by
    // the time we build cell `i` every cell it references already exists.
    let mut built: Vec<Option<Rc<Cell>>> = (0..cell_count).map(|_| None).collect();
    for i in (0..cell_count as usize).rev() {
        let r = &raw[i];
        let mut refs = Vec::with_capacity(r.ref_indices.len());
        for &ref_index in &r.ref_indices {
            if ref_index <= i as u32 {
                return Err(BocError::BadReference {
                    cell_index: i as u32,
                    ref_index,
                });
            }
            refs.push(built[ref_index as usize].clone().expect("built back-to-front"));
        }
        built[i] = Some(Cell::new(r.bits.clone(), refs));
    }

    Ok(Slice::new(built[root_index as usize].clone().expect("built above")))
}

fn unpack_bits(bytes: &[u8], bit_len: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(bit_len);
    for i in 0..bit_len {
        let byte = bytes[i / 8];
        let shift = 7 - (i % 8);
        bits.push((byte >> shift) & 1 == 1);
    }
    bits
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        ByteCursor { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], BocError> {
        if self.pos + len > self.bytes.len() {
            return Err(BocError::Truncated {
                expected: self.pos + len - self.bytes.len(),
                context,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self, context: &'static str) -> Result<u8, BocError> {
        Ok(self.read_bytes(1, context)?[0])
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16, BocError> {
        let b = self.read_bytes(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, BocError> {
        let b = self.read_bytes(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let mut bytes = vec![0u8; (bits.len() + 7) / 8];
        for (i, &b) in bits.iter().enumerate() {
            if b {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }

    #[test]
    fn single_leaf_cell_round_trips() {
        let bits = vec![true, false, true, true];
        let mut buf = Vec::new();
        buf.extend(1u32.to_be_bytes()); // cell_count
        buf.extend((bits.len() as u16).to_be_bytes());
        buf.extend(pack_bits(&bits));
        buf.push(0); // ref_count
        buf.extend(0u32.to_be_bytes()); // root_index

        let mut slice = deserialize(&buf).unwrap();
        assert_eq!(slice.load_uint(4, "x").unwrap(), 0b1011);
    }

    #[test]
    fn parent_with_one_child_resolves_back_to_front() {
        let mut buf = Vec::new();
        buf.extend(2u32.to_be_bytes());
        // cell 0: parent, 0 bits, 1 ref -> cell 1
        buf.extend(0u16.to_be_bytes());
        buf.push(0); // ref_count
        buf.extend(1u32.to_be_bytes());
        // cell 1: child leaf, 4 bits "1100"
        buf.extend(4u16.to_be_bytes());
        buf.extend(pack_bits(&[true, true, false, false]));
        buf.push(0);
        buf.extend(0u32.to_be_bytes()); // root_index = 0

        let mut root = deserialize(&buf).unwrap();
        assert_eq!(root.remaining_refs(), 1);
        let mut child = root.load_ref("c").unwrap();
        assert_eq!(child.load_uint(4, "v").unwrap(), 0b1100);
    }

    #[test]
    fn backward_reference_is_rejected() {
        let mut buf = Vec::new();
        buf.extend(2u32.to_be_bytes());
        buf.extend(0u16.to_be_bytes());
        buf.push(1);
        buf.extend(0u32.to_be_bytes()); // cell 0 refs cell 0: not strictly forward
        buf.extend(0u16.to_be_bytes());
        buf.push(0);
        buf.extend(0u32.to_be_bytes());

        assert!(matches!(deserialize(&buf), Err(BocError::BadReference { .. })));
    }

    #[test]
    fn truncated_buffer_errors() {
        let buf = vec![0u8, 0, 0]; // cell_count truncated (needs 4 bytes)
        assert!(matches!(deserialize(&buf), Err(BocError::Truncated { .. })));
    }
}
