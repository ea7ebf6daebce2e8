//! `lua-vm`: register-based virtual machine for Lua 5.3 bytecode.
//!
//! A [`LuaState`] owns the call frames and the registry. Hosts and the
//! instruction handlers alike drive it through the stack-indexed API in
//! [`api`]; [`stdlib::open_base`] installs the base library.

pub mod api;
mod closure;
mod config;
mod instructions;
mod stack;
mod state;
pub mod stdlib;
mod table;
mod value;

pub use api::{ArithOp, CompareOp, LUA_MINSTACK, LUA_MULTRET, LUA_REGISTRYINDEX, LUA_RIDX_GLOBALS, upvalue_index};
pub use closure::{LuaClosure, NativeFn};
pub use config::Config;
pub use state::LuaState;
pub use table::LuaTable;
pub use value::{LuaType, LuaValue};
