//! The instruction-set catalog: an external, immutable, data-driven
//! description of every opcode (`spec.md` §3, §6).
//!
//! This mirrors `wasmi`'s split between a fixed Rust `Instruction` enum
//! (`isa.rs`) and data consumed at runtime — except here the instruction
//! set itself is not known at compile time, so what would be a `match`
//! arm in `wasmi` becomes a row in this catalog instead.

/// A single named stack slot's accepted runtime value shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackType {
    Int,
    BigInt,
    Bool,
    Slice,
    Cell,
    Cont,
    ContMap,
    Any,
}

/// One 0-based, top-is-index-0 stack shuffle primitive (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleOp {
    /// Swap entries at depths `i` and `j`.
    Xchg(u32, u32),
    /// Duplicate the entry at depth `j`, `n` times, pushed onto the top.
    BlkPush(u32, u32),
    /// Pop the top `n` entries, swapping top with depth `j` before each pop.
    BlkPop(u32, u32),
    /// Reverse the contiguous run of length `n` ending at depth `j`.
    Reverse(u32, u32),
}

/// How a single declared operand is read off a [`crate::cell::Slice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    /// `w`-bit signed integer.
    Int(u32),
    /// `w`-bit unsigned integer.
    UInt(u32),
    /// Takes the next child reference as a new slice.
    Ref,
    /// A 5-bit unsigned length `L` followed by an `8*L+19`-bit signed
    /// integer.
    LongInt,
    /// A sub-slice whose bit/ref lengths are computed from fixed
    /// additives plus a named earlier operand (when present).
    Subslice {
        bits_add: u32,
        bits_len_var: Option<String>,
        refs_add: u32,
        refs_len_var: Option<String>,
        completion_tag: bool,
    },
}

/// A display hint attached to an operand declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayHint {
    /// This operand's slice should be recursively lifted as a
    /// continuation (`spec.md` §4.3 step 2).
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandDecl {
    pub name: String,
    pub kind: OperandKind,
    pub display_hint: Option<DisplayHint>,
}

/// A post-prefix range check used to disambiguate overlapping prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeCheck {
    pub length: u32,
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackInputEntry {
    Simple {
        name: String,
        types: Vec<StackType>,
    },
    Array {
        length_var: String,
        entry: Box<StackInputEntry>,
    },
}

impl StackInputEntry {
    pub fn simple(name: impl Into<String>, types: Vec<StackType>) -> Self {
        StackInputEntry::Simple {
            name: name.into(),
            types,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOutputEntry {
    Simple {
        name: String,
        types: Vec<StackType>,
    },
    Const {
        ty: StackType,
    },
    Array {
        length_var: String,
        entry: Box<StackOutputEntry>,
    },
    Conditional {
        arms: Vec<Vec<StackOutputEntry>>,
        else_arm: Option<Vec<StackOutputEntry>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueFlow {
    pub inputs: Vec<StackInputEntry>,
    pub outputs: Vec<StackOutputEntry>,
}

/// Where a control-flow branch target's continuation comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSource {
    /// Sourced from an already-resolved operand (by name).
    Operand(String),
    /// Sourced from a stack input (by name); resolved via that value's
    /// `continuation` metadata.
    StackInput(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub var_name: String,
    pub source: BranchSource,
    /// True when this branch's saved-cc slot is not "current
    /// continuation" — i.e. it is a jump, not a call, and the opcode
    /// never returns to the instruction after it.
    pub is_jump: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlFlow {
    pub branches: Vec<Branch>,
    /// True when the opcode is guaranteed to fall through to the next
    /// instruction (in addition to, or instead of, any branches above).
    pub nobranch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionSpec {
    pub mnemonic: String,
    /// Bit-prefix identifying this opcode, MSB-first.
    pub prefix: Vec<bool>,
    pub range_check: Option<RangeCheck>,
    pub operands: Vec<OperandDecl>,
    /// Free-form documentation category. `"stack_basic"` and
    /// `"stack_complex"` are pure stack shuffles; `"const_int"` and
    /// `"const_data"` are pure constant producers; anything else is
    /// opaque to the lifter.
    pub category: String,
    pub value_flow: Option<ValueFlow>,
    pub control_flow: Option<ControlFlow>,
    /// Decomposition into primitive shuffle ops, present only when
    /// `category` is `"stack_basic"` or `"stack_complex"`.
    pub shuffle_ops: Option<Vec<ShuffleOp>>,
}

impl InstructionSpec {
    pub fn is_shuffle(&self) -> bool {
        self.category == "stack_basic" || self.category == "stack_complex"
    }

    pub fn is_pure_const(&self) -> bool {
        self.category == "const_int" || self.category == "const_data"
    }
}

/// The full, immutable instruction-set catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub instructions: Vec<InstructionSpec>,
}

impl Catalog {
    pub fn new(instructions: Vec<InstructionSpec>) -> Self {
        Catalog { instructions }
    }

    pub fn mnemonic(&self, mnemonic: &str) -> Option<&InstructionSpec> {
        self.instructions.iter().find(|i| i.mnemonic == mnemonic)
    }
}
