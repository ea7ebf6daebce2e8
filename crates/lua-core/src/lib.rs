//! `lua-core`: foundational types shared across the lua-rust workspace.
//!
//! This crate defines:
//! - [`LuaError`]: the unified error type
//! - [`number`]: Lua numeric semantics (floor division, shifts, numerals)
//! - [`Instruction`] and [`OpCode`]: the Lua 5.3 instruction word
//! - [`Prototype`]: the compiled-function schema shared by compiler, codec and VM

pub mod error;
pub mod number;
pub mod opcode;
pub mod proto;

pub use error::LuaError;
pub use opcode::{Instruction, OpArgMode, OpCode, OpMode};
pub use proto::{Constant, LocVar, Prototype, UpvalueDesc};
