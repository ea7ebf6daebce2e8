//! `lua-compiler`: lowers the Lua AST to Lua 5.3 bytecode, reads and writes
//! binary chunks, and prints listings.

pub mod chunk;
pub mod compiler;
pub mod decode;
pub mod disasm;
pub mod encode;
mod expr;
mod func_info;

pub use chunk::is_binary_chunk;
pub use compiler::{compile, generate};
pub use decode::undump;
pub use disasm::disassemble;
pub use encode::dump;
