//! `lua-parser`: recursive-descent parser producing the Lua 5.3 [`ast::Block`] tree.

pub mod ast;
pub mod parser;

pub use parser::Parser;

/// Parse a whole chunk.
pub fn parse(src: &str) -> Result<ast::Block, lua_core::LuaError> {
    Parser::new(src)?.parse()
}
