//! The stack-indexed host API.
//!
//! Everything outside the VM (the standard library, the command line, an
//! embedding application) and every instruction handler reaches interpreter
//! state through these methods on [`LuaState`](crate::LuaState). Indices
//! follow the C API: `1..=top` from the bottom, `-1` for the top, then the
//! registry sentinel and the upvalue pseudo-indices below it.

mod access;
mod arith;
mod call;
mod compare;
mod get;
mod misc;
mod push;
mod set;
mod stack;
pub(crate) mod vm;

pub use arith::ArithOp;
pub use compare::CompareOp;

/// Free slots guaranteed to a host function on entry.
pub const LUA_MINSTACK: usize = 20;
pub const LUAI_MAXSTACK: i32 = 1_000_000;
/// Pseudo-index of the registry table.
pub const LUA_REGISTRYINDEX: i32 = -LUAI_MAXSTACK - 1000;
/// Registry slot holding the globals table.
pub const LUA_RIDX_GLOBALS: i64 = 2;
/// Result count meaning "leave every result on the stack".
pub const LUA_MULTRET: i32 = -1;

/// Pseudo-index of the running closure's `i`-th upvalue (1-based).
pub const fn upvalue_index(i: i32) -> i32 {
    LUA_REGISTRYINDEX - i
}

/// Upper bound on `__index`/`__newindex` chains before assuming a loop.
pub(crate) const MAX_META_CHAIN: usize = 2000;
