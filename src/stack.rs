//! The symbolic stack machine (`spec.md` §4.2).
//!
//! Tracks an abstract operand stack of named value identifiers while the
//! [`crate::lifter::Lifter`] walks instructions, the same role `wasmi`'s
//! `validation::func::FunctionValidationContext` value stack plays while
//! walking Wasm instructions — except values here carry no static type,
//! only identity, and the "polymorphic after unreachable" trick from
//! `wasmi` is generalized here into the conditional-alignment guard.

use std::rc::Rc;

use crate::catalog::ShuffleOp;
use crate::error::LiftError;
use crate::ir::Function;

/// Mints globally-unique, per-decompilation-run identifiers.
///
/// Must be per-run, never process-global (`spec.md` §5): independent
/// decompilations must be deterministic and reproducible on their own.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_var: u64,
    next_arg: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator::default()
    }

    pub fn fresh_var(&mut self) -> String {
        let id = format!("var{}", self.next_var);
        self.next_var += 1;
        id
    }

    pub fn fresh_arg(&mut self) -> String {
        let id = format!("arg{}", self.next_arg);
        self.next_arg += 1;
        id
    }
}

/// An abstract stack value: an identifier plus, when it was produced by
/// a "push continuation" opcode, the lifted function it denotes.
#[derive(Debug, Clone)]
pub struct StackValue {
    pub id: String,
    pub continuation: Option<Rc<Function>>,
}

impl StackValue {
    pub fn new(id: impl Into<String>) -> Self {
        StackValue {
            id: id.into(),
            continuation: None,
        }
    }

    pub fn with_continuation(mut self, f: Rc<Function>) -> Self {
        self.continuation = Some(f);
        self
    }
}

/// A pending conditional-alignment boundary (`spec.md` §4.2).
#[derive(Debug, Clone)]
struct GuardState {
    /// Distance between the current top and the boundary below which
    /// access is blocked.
    depth: usize,
    /// One ordered list of pending variables per arm.
    arms: Vec<Vec<StackValue>>,
}

/// Ordered bottom-to-top sequence of abstract stack values, plus an
/// optional guard.
#[derive(Debug, Clone, Default)]
pub struct SymbolicStack {
    values: Vec<StackValue>,
    guard: Option<GuardState>,
}

impl SymbolicStack {
    pub fn new() -> Self {
        SymbolicStack::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    /// A cheap snapshot to retry an instruction from, per the lifter's
    /// "take a snapshot... retry on a fresh snapshot" step.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Pops the top value. If the guard's boundary would be crossed,
    /// fails with `GuardUnresolved`; if the stack itself is too shallow,
    /// fails with `StackUnderflow`.
    pub fn pop(&mut self) -> Result<StackValue, LiftError> {
        if let Some(guard) = &mut self.guard {
            if guard.depth == 0 {
                return Err(LiftError::GuardUnresolved);
            }
            guard.depth -= 1;
        }
        self.values.pop().ok_or(LiftError::StackUnderflow { depth: 1 })
    }

    /// Pushes a fresh value and returns it.
    pub fn push(&mut self, alloc: &mut IdAllocator) -> StackValue {
        let value = StackValue::new(alloc.fresh_var());
        self.push_value(value.clone());
        value
    }

    /// Pushes an already-constructed value (e.g. one carrying
    /// `continuation` metadata).
    pub fn push_value(&mut self, value: StackValue) {
        if let Some(guard) = &mut self.guard {
            guard.depth += 1;
        }
        self.values.push(value);
    }

    /// Copies (duplicates) the value at `depth` from the top (0 = top)
    /// onto the top of the stack, without minting a fresh id — this is
    /// how `blkpush` duplicates an existing value's identity, matching
    /// the fact that the duplicate and the original denote the same
    /// runtime value until one of them is consumed by a different
    /// instruction.
    pub fn copy(&self, depth: usize) -> Result<StackValue, LiftError> {
        let len = self.values.len();
        if depth >= len {
            return Err(LiftError::StackUnderflow {
                depth: depth + 1 - len,
            });
        }
        Ok(self.values[len - 1 - depth].clone())
    }

    fn index_from_top(&self, depth: u32) -> Result<usize, LiftError> {
        let len = self.values.len();
        let depth = depth as usize;
        if depth >= len {
            return Err(LiftError::StackUnderflow {
                depth: depth + 1 - len,
            });
        }
        Ok(len - 1 - depth)
    }

    /// Synthesizes `count` fresh `arg`-named values and inserts them at
    /// the bottom of the stack (the highest-numbered synthesized
    /// parameter is placed deepest, so a subsequent `pop()` yields the
    /// last synthesized argument first — see `spec.md` §9 open question
    /// on `insertArgsAtBottom` ordering, resolved in `DESIGN.md`).
    /// Returns the new ids in the order they were inserted (bottom to
    /// top among themselves).
    pub fn insert_args_at_bottom(&mut self, count: usize, alloc: &mut IdAllocator) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        // Each newly minted id is inserted at position 0 in turn, so
        // arg0 (minted first) ends up nearest the top of the
        // synthesized run and arg{count-1} (minted last) ends up at the
        // very bottom — the deepest position holds the highest-numbered
        // parameter, per `spec.md` §9's resolved open question.
        for _ in 0..count {
            let id = alloc.fresh_arg();
            ids.push(id.clone());
            self.values.insert(0, StackValue::new(id));
        }
        if let Some(guard) = &mut self.guard {
            guard.depth += count;
        }
        ids
    }

    /// Applies one of the four shuffle primitives directly to the
    /// symbolic stack. No IR primitive is ever emitted for this
    /// (`spec.md` §8 invariant 5).
    pub fn exec_op(&mut self, op: ShuffleOp) -> Result<(), LiftError> {
        match op {
            ShuffleOp::Xchg(i, j) => {
                let a = self.index_from_top(i)?;
                let b = self.index_from_top(j)?;
                self.values.swap(a, b);
            }
            ShuffleOp::BlkPush(n, j) => {
                for _ in 0..n {
                    let v = self.copy(j as usize)?;
                    self.values.push(v);
                }
            }
            ShuffleOp::BlkPop(n, j) => {
                for _ in 0..n {
                    if j != 0 {
                        let top = self.index_from_top(0)?;
                        let deep = self.index_from_top(j)?;
                        self.values.swap(top, deep);
                    }
                    self.pop_raw()?;
                }
            }
            ShuffleOp::Reverse(n, j) => {
                let bottom_of_run = self.index_from_top(j)?;
                let n = n as usize;
                if n == 0 {
                    return Ok(());
                }
                if bottom_of_run + 1 < n {
                    return Err(LiftError::StackUnderflow {
                        depth: n - bottom_of_run - 1,
                    });
                }
                let start = bottom_of_run + 1 - n;
                self.values[start..=bottom_of_run].reverse();
            }
        }
        Ok(())
    }

    /// Raw pop used internally by shuffle ops: does not touch the guard
    /// (shuffles never straddle a pending conditional boundary in a way
    /// that needs separate accounting — the guard's depth already
    /// tracks how many values above the boundary are free to move).
    fn pop_raw(&mut self) -> Result<StackValue, LiftError> {
        self.values.pop().ok_or(LiftError::StackUnderflow { depth: 1 })
    }

    /// Installs or tightens a conditional-alignment guard ahead of a
    /// `conditional(arms)` stack-output entry. When a guard already
    /// exists, the more restrictive (smaller) depth wins, and the arm
    /// count is resized by extending new arms with empty lists or
    /// trimming extras.
    pub fn ensure_guard(&mut self, depth_from_top: usize, arm_count: usize) {
        match &mut self.guard {
            None => {
                self.guard = Some(GuardState {
                    depth: depth_from_top,
                    arms: vec![Vec::new(); arm_count],
                });
            }
            Some(guard) => {
                guard.depth = guard.depth.min(depth_from_top);
                guard.arms.resize(arm_count, Vec::new());
            }
        }
    }

    /// Appends pending variables to one arm's list.
    pub fn append_to_guard_arm(&mut self, idx: usize, vars: Vec<StackValue>) {
        if let Some(guard) = &mut self.guard {
            if idx < guard.arms.len() {
                guard.arms[idx].extend(vars);
            }
        }
    }

    /// Finalizes the guard if all arms hold the same number of pending
    /// variables: allocates one fresh merged variable per position,
    /// inserts them below the currently-available region, clears the
    /// guard, and returns the merged list.
    pub fn try_finalize_guard(&mut self, alloc: &mut IdAllocator) -> Option<Vec<StackValue>> {
        let guard = self.guard.as_ref()?;
        let expected = guard.arms.first().map(Vec::len).unwrap_or(0);
        if !guard.arms.iter().all(|a| a.len() == expected) {
            return None;
        }
        let guard = self.guard.take().unwrap();
        let merged: Vec<StackValue> = (0..expected).map(|_| StackValue::new(alloc.fresh_var())).collect();
        let insert_at = self.values.len() - guard.depth;
        for (offset, v) in merged.iter().enumerate() {
            self.values.insert(insert_at + offset, v.clone());
        }
        Some(merged)
    }

    /// Returns the stack contents bottom-to-top (used to populate a
    /// function's `result` once the main loop stops).
    pub fn into_values(self) -> Vec<StackValue> {
        self.values
    }

    pub fn values(&self) -> &[StackValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_n(stack: &mut SymbolicStack, alloc: &mut IdAllocator, n: usize) -> Vec<String> {
        (0..n).map(|_| stack.push(alloc).id).collect()
    }

    #[test]
    fn xchg_swaps_by_depth() {
        let mut alloc = IdAllocator::new();
        let mut stack = SymbolicStack::new();
        let ids = push_n(&mut stack, &mut alloc, 3); // bottom..top: 0,1,2
        stack.exec_op(ShuffleOp::Xchg(0, 2)).unwrap();
        let top_ids: Vec<_> = stack.values().iter().map(|v| v.id.clone()).collect();
        assert_eq!(top_ids, vec![ids[2].clone(), ids[1].clone(), ids[0].clone()]);
    }

    #[test]
    fn blkpush_duplicates_identity() {
        let mut alloc = IdAllocator::new();
        let mut stack = SymbolicStack::new();
        let ids = push_n(&mut stack, &mut alloc, 2);
        stack.exec_op(ShuffleOp::BlkPush(2, 1)).unwrap();
        let top_ids: Vec<_> = stack.values().iter().map(|v| v.id.clone()).collect();
        assert_eq!(top_ids, vec![ids[0].clone(), ids[1].clone(), ids[0].clone(), ids[0].clone()]);
    }

    #[test]
    fn reverse_reverses_contiguous_run() {
        let mut alloc = IdAllocator::new();
        let mut stack = SymbolicStack::new();
        let ids = push_n(&mut stack, &mut alloc, 4);
        stack.exec_op(ShuffleOp::Reverse(3, 0)).unwrap();
        let top_ids: Vec<_> = stack.values().iter().map(|v| v.id.clone()).collect();
        assert_eq!(
            top_ids,
            vec![ids[0].clone(), ids[3].clone(), ids[2].clone(), ids[1].clone()]
        );
    }

    #[test]
    fn underflow_reports_missing_depth() {
        let mut stack = SymbolicStack::new();
        let err = stack.pop().unwrap_err();
        assert_eq!(err, LiftError::StackUnderflow { depth: 1 });
    }

    #[test]
    fn guard_finalizes_when_arms_equal() {
        let mut alloc = IdAllocator::new();
        let mut stack = SymbolicStack::new();
        stack.ensure_guard(0, 2);
        stack.append_to_guard_arm(0, vec![StackValue::new("a")]);
        stack.append_to_guard_arm(1, vec![StackValue::new("b")]);
        let merged = stack.try_finalize_guard(&mut alloc).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(!stack.has_guard());
    }

    #[test]
    fn guard_does_not_finalize_on_mismatched_arms() {
        let mut alloc = IdAllocator::new();
        let mut stack = SymbolicStack::new();
        stack.ensure_guard(0, 2);
        stack.append_to_guard_arm(0, vec![StackValue::new("a")]);
        assert!(stack.try_finalize_guard(&mut alloc).is_none());
        assert!(stack.has_guard());
    }

    #[test]
    fn pop_past_guard_boundary_is_unresolved() {
        let mut stack = SymbolicStack::new();
        stack.ensure_guard(0, 2);
        assert_eq!(stack.pop().unwrap_err(), LiftError::GuardUnresolved);
    }
}
