use std::rc::Rc;

use crate::closure::{LuaClosure, NativeFn, Upvalue};
use crate::state::LuaState;
use crate::value::LuaValue;

/// Pushing values. Like every push, these need a free slot; see
/// [`LuaState::check_stack`].
impl LuaState {
    pub fn push(&mut self, val: LuaValue) {
        self.stack.push(val);
    }

    pub fn push_nil(&mut self) {
        self.stack.push(LuaValue::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.stack.push(LuaValue::Boolean(b));
    }

    pub fn push_integer(&mut self, n: i64) {
        self.stack.push(LuaValue::Integer(n));
    }

    pub fn push_number(&mut self, n: f64) {
        self.stack.push(LuaValue::Float(n));
    }

    pub fn push_string(&mut self, s: &str) {
        self.stack.push(LuaValue::from(s));
    }

    pub fn push_native_function(&mut self, f: NativeFn) {
        self.push_native_closure(f, 0);
    }

    /// Push `f` as a closure whose `n` upvalues are popped from the stack,
    /// the first upvalue being the deepest of them.
    pub fn push_native_closure(&mut self, f: NativeFn, n: usize) {
        let mut closure = LuaClosure::from_native(f, n);
        for (uv, val) in closure.upvals.iter_mut().zip(self.stack.pop_n(n)) {
            *uv = Upvalue::closed(val);
        }
        self.stack.push(LuaValue::Function(Rc::new(closure)));
    }

    pub fn push_global_table(&mut self) {
        let globals = self.globals();
        self.stack.push(globals);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::upvalue_index;
    use lua_core::LuaError;

    fn counter(ls: &mut LuaState) -> Result<usize, LuaError> {
        let n = ls.to_integer(upvalue_index(1)) + 1;
        ls.push_integer(n);
        ls.copy(-1, upvalue_index(1));
        ls.push_value(upvalue_index(2));
        Ok(2)
    }

    #[test]
    fn native_closure_owns_its_upvalues() {
        let mut ls = LuaState::new();
        ls.push_integer(10);
        ls.push_string("tag");
        ls.push_native_closure(counter, 2);
        assert_eq!(ls.get_top(), 1);
        assert!(ls.is_native_function(1));

        for expect in [11, 12] {
            ls.push_value(1);
            ls.call(0, 2).unwrap();
            assert_eq!(ls.to_integer(-2), expect);
            assert_eq!(&*ls.to_string(-1), "tag");
            ls.pop(2);
        }
    }

    #[test]
    fn global_table_is_a_table() {
        let mut ls = LuaState::new();
        ls.push_global_table();
        assert!(ls.is_table(-1));
    }
}
