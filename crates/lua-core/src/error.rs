use thiserror::Error;

/// All errors that can surface from loading, compiling or running a chunk.
///
/// Stack-protocol contract violations are not represented here: they are
/// bugs in the caller and abort with a `stack fault:` panic instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LuaError {
    /// A lexer or parser failure.
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: u32, message: String },

    /// A construct the code generator refuses (goto, stray `...`, stray `break`).
    #[error("compile error: {0}")]
    Compile(String),

    /// Malformed, truncated or foreign binary chunk.
    #[error("bad binary chunk: {0}")]
    ChunkFormat(String),

    /// `nil` or NaN used as a table key.
    #[error("invalid table key: {0}")]
    InvalidKey(String),

    /// Indexing a value that is not a table and has no usable `__index`/`__newindex`.
    #[error("attempt to index a {0} value")]
    Index(String),

    /// Calling a value that is not a function and has no usable `__call`.
    #[error("attempt to call a {0} value")]
    Call(String),

    /// Ordering two values that cannot be compared.
    #[error("attempt to compare {0}")]
    Comparison(String),

    /// Arithmetic, bitwise, length or concatenation on unsupported operands.
    #[error("{0}")]
    Arithmetic(String),

    /// Raised explicitly by a host function such as `error`.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Nested calls exceeded the configured depth.
    #[error("stack overflow")]
    StackOverflow,
}
