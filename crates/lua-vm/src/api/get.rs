use lua_core::LuaError;
use tracing::debug;

use super::MAX_META_CHAIN;
use crate::state::LuaState;
use crate::value::{LuaType, LuaValue};

/// Table reads. Each pushes the value read and returns its type.
impl LuaState {
    pub fn new_table(&mut self) {
        self.create_table(0, 0);
    }

    /// Push an empty table pre-sized for `n_arr` sequence items and `n_rec`
    /// other fields.
    pub fn create_table(&mut self, n_arr: usize, n_rec: usize) {
        self.stack.push(LuaValue::new_table(n_arr, n_rec));
    }

    /// `t[k]` where `t` is at `idx` and `k` is popped from the top.
    pub fn get_table(&mut self, idx: i32) -> Result<LuaType, LuaError> {
        let t = self.get_value(idx);
        let k = self.stack.pop();
        self.push_index(t, k, false)
    }

    pub fn get_field(&mut self, idx: i32, k: &str) -> Result<LuaType, LuaError> {
        let t = self.get_value(idx);
        self.push_index(t, LuaValue::from(k), false)
    }

    pub fn get_i(&mut self, idx: i32, i: i64) -> Result<LuaType, LuaError> {
        let t = self.get_value(idx);
        self.push_index(t, LuaValue::Integer(i), false)
    }

    /// [`get_table`](Self::get_table) without `__index`.
    pub fn raw_get(&mut self, idx: i32) -> Result<LuaType, LuaError> {
        let t = self.get_value(idx);
        let k = self.stack.pop();
        self.push_index(t, k, true)
    }

    pub fn raw_get_i(&mut self, idx: i32, i: i64) -> Result<LuaType, LuaError> {
        let t = self.get_value(idx);
        self.push_index(t, LuaValue::Integer(i), true)
    }

    pub fn get_global(&mut self, name: &str) -> Result<LuaType, LuaError> {
        let globals = self.globals();
        self.push_index(globals, LuaValue::from(name), false)
    }

    /// Push the metatable of the value at `idx`, if it has one.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        match self.metatable_of(&self.get_value(idx)) {
            Some(mt) => {
                self.stack.push(LuaValue::Table(mt));
                true
            }
            None => false,
        }
    }

    fn push_index(&mut self, t: LuaValue, k: LuaValue, raw: bool) -> Result<LuaType, LuaError> {
        let v = self.index(t, k, raw)?;
        let tp = v.type_of();
        self.stack.push(v);
        Ok(tp)
    }

    /// `t[k]`, following `__index` unless `raw`.
    ///
    /// A table-valued (or any non-function) `__index` is indexed in turn; a
    /// function is called with `(t, k)` and its first result is the answer.
    pub(crate) fn index(&mut self, mut t: LuaValue, k: LuaValue, raw: bool) -> Result<LuaValue, LuaError> {
        for _ in 0..MAX_META_CHAIN {
            if let LuaValue::Table(tbl) = &t {
                let tbl = tbl.borrow();
                let v = tbl.get(&k);
                if raw || !v.is_nil() || !tbl.has_metafield("__index") {
                    return Ok(v);
                }
            } else if raw {
                return Err(LuaError::Index(t.type_name().into()));
            }

            match self.metafield(&t, "__index") {
                LuaValue::Nil => return Err(LuaError::Index(t.type_name().into())),
                mm @ LuaValue::Function(_) => {
                    debug!("__index fallback to function");
                    self.stack.check(3);
                    self.stack.push(mm);
                    self.stack.push(t);
                    self.stack.push(k);
                    self.call(2, 1)?;
                    return Ok(self.stack.pop());
                }
                next => {
                    debug!("__index fallback to {}", next.type_name());
                    t = next;
                }
            }
        }
        Err(LuaError::Runtime("'__index' chain too long; possibly a loop".into()))
    }
}

#[cfg(test)]
mod tests {
    use crate::state::LuaState;
    use crate::value::LuaType;
    use lua_core::LuaError;

    #[test]
    fn fields_and_indices() {
        let mut ls = LuaState::new();
        ls.new_table();
        ls.push_string("v");
        ls.set_field(1, "k").unwrap();
        ls.push_integer(7);
        ls.set_i(1, 1).unwrap();

        assert_eq!(ls.get_field(1, "k").unwrap(), LuaType::String);
        assert_eq!(ls.get_i(1, 1).unwrap(), LuaType::Number);
        assert_eq!(ls.to_integer(-1), 7);
        ls.push_string("missing");
        assert_eq!(ls.get_table(1).unwrap(), LuaType::Nil);
    }

    #[test]
    fn index_chain_through_tables() {
        let mut ls = LuaState::new();
        // base = { x = 1 }, mt = { __index = base }, t = setmetatable({}, mt)
        ls.new_table();
        ls.push_integer(1);
        ls.set_field(1, "x").unwrap();
        ls.new_table();
        ls.push_value(1);
        ls.set_field(2, "__index").unwrap();
        ls.new_table();
        ls.push_value(2);
        ls.set_metatable(3).unwrap();

        assert_eq!(ls.get_field(3, "x").unwrap(), LuaType::Number);
        assert_eq!(ls.to_integer(-1), 1);
        ls.pop(1);
        ls.push_string("x");
        assert_eq!(ls.raw_get(3).unwrap(), LuaType::Nil);
    }

    #[test]
    fn indexing_a_non_table_fails() {
        let mut ls = LuaState::new();
        ls.push_integer(1);
        assert_eq!(
            ls.get_field(1, "x"),
            Err(LuaError::Index("number".into()))
        );
    }

    #[test]
    fn metatable_presence() {
        let mut ls = LuaState::new();
        ls.new_table();
        assert!(!ls.get_metatable(1));
        ls.new_table();
        ls.set_metatable(1).unwrap();
        assert!(ls.get_metatable(1));
        assert!(ls.is_table(-1));
    }
}
