use lua_core::LuaError;
use tracing::debug;

use super::MAX_META_CHAIN;
use crate::closure::NativeFn;
use crate::state::LuaState;
use crate::value::LuaValue;

/// Table writes. The value (and key, where it is not an argument) are
/// popped from the top.
impl LuaState {
    /// `t[k] = v` where `t` is at `idx`, `v` is on top and `k` below it.
    pub fn set_table(&mut self, idx: i32) -> Result<(), LuaError> {
        let t = self.get_value(idx);
        let v = self.stack.pop();
        let k = self.stack.pop();
        self.new_index(t, k, v, false)
    }

    pub fn set_field(&mut self, idx: i32, k: &str) -> Result<(), LuaError> {
        let t = self.get_value(idx);
        let v = self.stack.pop();
        self.new_index(t, LuaValue::from(k), v, false)
    }

    pub fn set_i(&mut self, idx: i32, i: i64) -> Result<(), LuaError> {
        let t = self.get_value(idx);
        let v = self.stack.pop();
        self.new_index(t, LuaValue::Integer(i), v, false)
    }

    /// [`set_table`](Self::set_table) without `__newindex`.
    pub fn raw_set(&mut self, idx: i32) -> Result<(), LuaError> {
        let t = self.get_value(idx);
        let v = self.stack.pop();
        let k = self.stack.pop();
        self.new_index(t, k, v, true)
    }

    pub fn raw_set_i(&mut self, idx: i32, i: i64) -> Result<(), LuaError> {
        let t = self.get_value(idx);
        let v = self.stack.pop();
        self.new_index(t, LuaValue::Integer(i), v, true)
    }

    pub fn set_global(&mut self, name: &str) -> Result<(), LuaError> {
        let globals = self.globals();
        let v = self.stack.pop();
        self.new_index(globals, LuaValue::from(name), v, false)
    }

    /// Install `f` as the global `name`.
    pub fn register(&mut self, name: &str, f: NativeFn) -> Result<(), LuaError> {
        self.push_native_function(f);
        self.set_global(name)
    }

    /// Pop a table (or `nil`) and make it the metatable of the value at `idx`.
    pub fn set_metatable(&mut self, idx: i32) -> Result<(), LuaError> {
        let target = self.get_value(idx);
        let mt = match self.stack.pop() {
            LuaValue::Nil => None,
            LuaValue::Table(mt) => Some(mt),
            other => {
                return Err(LuaError::Runtime(format!(
                    "metatable must be a table or nil, got {}",
                    other.type_name()
                )));
            }
        };
        self.set_metatable_of(&target, mt);
        Ok(())
    }

    /// `t[k] = v`, following `__newindex` unless `raw`.
    ///
    /// `__newindex` only applies when the key is absent from the table.
    pub(crate) fn new_index(
        &mut self,
        mut t: LuaValue,
        k: LuaValue,
        v: LuaValue,
        raw: bool,
    ) -> Result<(), LuaError> {
        for _ in 0..MAX_META_CHAIN {
            if let LuaValue::Table(tbl) = &t {
                let dispatch = !raw && {
                    let tbl = tbl.borrow();
                    tbl.get(&k).is_nil() && tbl.has_metafield("__newindex")
                };
                if !dispatch {
                    return tbl.borrow_mut().put(k, v);
                }
            } else if raw {
                return Err(LuaError::Index(t.type_name().into()));
            }

            match self.metafield(&t, "__newindex") {
                LuaValue::Nil => return Err(LuaError::Index(t.type_name().into())),
                mm @ LuaValue::Function(_) => {
                    debug!("__newindex fallback to function");
                    self.stack.check(4);
                    self.stack.push(mm);
                    self.stack.push(t);
                    self.stack.push(k);
                    self.stack.push(v);
                    return self.call(3, 0);
                }
                next => {
                    debug!("__newindex fallback to {}", next.type_name());
                    t = next;
                }
            }
        }
        Err(LuaError::Runtime("'__newindex' chain too long; possibly a loop".into()))
    }
}
