//! The IR data model (`spec.md` §3).
//!
//! Mirrors how `wasmi`'s `isa::Instruction` is a closed enum describing
//! one already-validated instruction, except every primitive here also
//! carries its symbolic inputs/outputs, because this IR is dataflow- not
//! control-flow-oriented.

use std::collections::BTreeMap;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::catalog::StackType;
use crate::cell::{Cell, Slice};

/// A tagged-variant operand value (`spec.md` §3 "IR operand value").
#[derive(Debug, Clone, PartialEq)]
pub enum OperandValue {
    Int(i64),
    BigInt(BigInt),
    Bool(bool),
    Slice(Slice),
    Cell(Rc<Cell>),
    Cont(Rc<Function>),
    ContMap(BTreeMap<i64, Rc<Function>>),
    /// Opaque future-proofing arm; carries a debug rendering only.
    Other(String),
}

/// Names an existing value (a reference) or introduces a new one (a
/// definition). Both wrap an id plus optional static type hints; a
/// reference may additionally carry continuation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRef {
    pub id: String,
    pub types: Option<Vec<StackType>>,
    /// Set when this value was produced by a "push continuation" opcode
    /// and later control-flow resolution needs to reach the lifted
    /// function through the stack (`spec.md` §3 "Abstract stack value").
    pub continuation: Option<Rc<Function>>,
}

impl ValueRef {
    pub fn new(id: impl Into<String>) -> Self {
        ValueRef {
            id: id.into(),
            types: None,
            continuation: None,
        }
    }

    pub fn with_types(mut self, types: Vec<StackType>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_continuation(mut self, f: Rc<Function>) -> Self {
        self.continuation = Some(f);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValueDef {
    pub id: String,
    pub types: Option<Vec<StackType>>,
}

impl ValueDef {
    pub fn new(id: impl Into<String>) -> Self {
        ValueDef {
            id: id.into(),
            types: None,
        }
    }

    pub fn with_types(mut self, types: Vec<StackType>) -> Self {
        self.types = Some(types);
        self
    }
}

/// An IR input argument: a reference to a previously defined value, or an
/// inline expression embedding the whole producer statement (only ever
/// produced by the inlining passes, `spec.md` §4.4).
#[derive(Debug, Clone, PartialEq)]
pub enum InputArg {
    Ref(ValueRef),
    Inline(Box<Primitive>),
}

impl InputArg {
    /// The id this argument ultimately reads from, if it is a plain
    /// reference (inline expressions do not read an outer id).
    pub fn referenced_id(&self) -> Option<&str> {
        match self {
            InputArg::Ref(r) => Some(&r.id),
            InputArg::Inline(_) => None,
        }
    }
}

/// One IR instruction: a spec mnemonic plus ordered inputs, operands,
/// and outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub mnemonic: String,
    /// The originating spec's free-form documentation category; carried
    /// along so the pass pipeline can recognize `const_int`/`const_data`
    /// producers without re-consulting the catalog.
    pub category: String,
    /// Ordered as spec stack-input order (deepest-to-top).
    pub inputs: Vec<(String, InputArg)>,
    pub operands: Vec<(String, OperandValue)>,
    /// Ordered as spec stack-output order.
    pub outputs: Vec<(String, ValueDef)>,
}

impl Primitive {
    pub fn new(mnemonic: impl Into<String>, category: impl Into<String>) -> Self {
        Primitive {
            mnemonic: mnemonic.into(),
            category: category.into(),
            inputs: Vec::new(),
            operands: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_pure_const(&self) -> bool {
        self.category == "const_int" || self.category == "const_data"
    }

    /// Ids this statement defines.
    pub fn output_ids(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(_, d)| d.id.as_str())
    }

    /// Every id directly referenced by this statement's non-inline
    /// inputs. Does not recurse into inline expressions — callers that
    /// need full transitive use-sets should walk those explicitly.
    pub fn referenced_ids(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().filter_map(|(_, a)| a.referenced_id())
    }
}

/// One raw, un-decompilable instruction captured into `asm_tail`
/// (`spec.md` §7: "partial output is more useful than silent failure").
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    pub mnemonic: String,
    pub operands: Vec<(String, OperandValue)>,
}

/// What was left over when decoding aborted.
#[derive(Debug, Clone, PartialEq)]
pub struct TailSliceInfo {
    pub remaining_bits: usize,
    pub remaining_refs: usize,
}

/// A lifted function: formal parameters, a linear body, and the stack
/// contents at the point execution stops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub args: Vec<ValueDef>,
    pub body: Vec<Primitive>,
    pub result: Vec<ValueRef>,
    pub asm_tail: Vec<RawInstruction>,
    pub tail_slice_info: Option<TailSliceInfo>,
    pub decompile_error: Option<String>,
    pub disassemble_error: Option<String>,
}

impl Function {
    pub fn new() -> Self {
        Function::default()
    }

    pub fn has_error(&self) -> bool {
        self.decompile_error.is_some() || self.disassemble_error.is_some()
    }
}

/// A decompiled program: either one function, or a method dictionary.
#[derive(Debug, Clone)]
pub enum Program {
    Single(Function),
    /// Method id -> lifted entry, always rendered/iterated in ascending
    /// key order (`spec.md` §4.5 / Scenario D).
    Multi(BTreeMap<i64, Function>),
}
