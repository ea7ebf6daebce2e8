use crate::api::LUA_MINSTACK;

/// Limits applied to a [`LuaState`](crate::LuaState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Nested call limit; exceeding it yields `LuaError::StackOverflow`.
    pub max_call_depth: usize,
    /// Slack slots added to every new frame on top of its registers or arguments.
    pub min_stack: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: 200,
            min_stack: LUA_MINSTACK,
        }
    }
}
