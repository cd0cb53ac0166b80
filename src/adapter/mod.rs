//! Adapters between the core decompilation pipeline and the outside
//! world: turning raw container bytes into a root [`crate::cell::Slice`]
//! ([`boc`]), and turning a decompiled [`crate::ir::Program`] into
//! rendered pseudo-code text ([`render`]).
//!
//! Neither adapter is part of the decompilation algorithm described by
//! the core modules; they exist only so the CLI binary has something to
//! call on either side of it.

pub mod boc;
pub mod render;
