use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use lua_core::LuaError;
use tracing::{debug, trace};

use crate::api::{LUA_REGISTRYINDEX, LUA_RIDX_GLOBALS};
use crate::closure::{Upvalue, UpvalueState};
use crate::config::Config;
use crate::stack::LuaStack;
use crate::table::LuaTable;
use crate::value::{LuaValue, TableRef};

/// A Lua interpreter instance: the frame stack, the registry and limits.
///
/// All host interaction goes through the stack-indexed API implemented on
/// this type in [`crate::api`].
pub struct LuaState {
    /// The active frame.
    pub(crate) stack: LuaStack,
    /// Suspended caller frames, outermost first. The active frame sits at
    /// depth `callers.len()`.
    pub(crate) callers: Vec<LuaStack>,
    pub(crate) registry: TableRef,
    pub(crate) config: Config,
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

impl LuaState {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut registry = LuaTable::new(8, 0);
        registry.put_int(LUA_RIDX_GLOBALS, LuaValue::new_table(0, 0));
        Self {
            stack: LuaStack::new(config.min_stack, None),
            callers: Vec::new(),
            registry: Rc::new(RefCell::new(registry)),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of frames above the host's base frame.
    pub fn depth(&self) -> usize {
        self.callers.len()
    }

    // ── Frames ────────────────────────────────────────────────────────────────

    pub(crate) fn push_frame(&mut self, frame: LuaStack) {
        let caller = mem::replace(&mut self.stack, frame);
        self.callers.push(caller);
        trace!(depth = self.callers.len(), "push frame");
    }

    /// Pop the active frame, closing its open upvalues.
    pub(crate) fn pop_frame(&mut self) -> LuaStack {
        let Some(caller) = self.callers.pop() else {
            panic!("stack fault: pop of the base frame");
        };
        let mut frame = mem::replace(&mut self.stack, caller);
        frame.close_upvalues(0);
        trace!(depth = self.callers.len(), "pop frame");
        frame
    }

    fn frame(&self, depth: usize) -> Option<&LuaStack> {
        if depth == self.callers.len() {
            Some(&self.stack)
        } else {
            self.callers.get(depth)
        }
    }

    fn frame_mut(&mut self, depth: usize) -> Option<&mut LuaStack> {
        if depth == self.callers.len() {
            Some(&mut self.stack)
        } else {
            self.callers.get_mut(depth)
        }
    }

    // ── Indexed access ────────────────────────────────────────────────────────

    /// Read any index: registers, the registry sentinel or an upvalue
    /// pseudo-index. Invalid indices read as `nil`.
    pub(crate) fn get_value(&self, idx: i32) -> LuaValue {
        if idx == LUA_REGISTRYINDEX {
            return LuaValue::Table(self.registry.clone());
        }
        if idx < LUA_REGISTRYINDEX {
            return match self.upvalue_at(idx) {
                Some(uv) => self.read_upvalue(&uv),
                None => LuaValue::Nil,
            };
        }
        self.stack.get(idx)
    }

    pub(crate) fn set_value(&mut self, idx: i32, val: LuaValue) {
        if idx == LUA_REGISTRYINDEX {
            match val {
                LuaValue::Table(t) => self.registry = t,
                other => panic!("stack fault: registry replaced by a {}", other.type_name()),
            }
            return;
        }
        if idx < LUA_REGISTRYINDEX {
            match self.upvalue_at(idx) {
                Some(uv) => self.write_upvalue(&uv, val),
                None => panic!("stack fault: invalid upvalue index {idx}"),
            }
            return;
        }
        self.stack.set(idx, val);
    }

    pub(crate) fn is_valid(&self, idx: i32) -> bool {
        if idx == LUA_REGISTRYINDEX {
            true
        } else if idx < LUA_REGISTRYINDEX {
            self.upvalue_at(idx).is_some()
        } else {
            self.stack.is_valid(idx)
        }
    }

    fn upvalue_at(&self, idx: i32) -> Option<Upvalue> {
        let n = (LUA_REGISTRYINDEX - idx - 1) as usize;
        self.stack.closure.as_ref()?.upvals.get(n).cloned()
    }

    pub(crate) fn read_upvalue(&self, uv: &Upvalue) -> LuaValue {
        match &*uv.state() {
            UpvalueState::Open { frame, slot } => self
                .frame(*frame)
                .map(|f| f.slot(*slot))
                .unwrap_or_default(),
            UpvalueState::Closed(v) => v.clone(),
        }
    }

    pub(crate) fn write_upvalue(&mut self, uv: &Upvalue, val: LuaValue) {
        if let Some((frame, slot, val)) = uv.store(val) {
            if let Some(f) = self.frame_mut(frame) {
                f.set_slot(slot, val);
            }
        }
    }

    pub(crate) fn globals(&self) -> LuaValue {
        self.registry.borrow().get_int(LUA_RIDX_GLOBALS)
    }

    // ── Metatables ────────────────────────────────────────────────────────────

    /// Tables carry their own metatable; every other type shares one stored
    /// in the registry.
    pub(crate) fn metatable_of(&self, val: &LuaValue) -> Option<TableRef> {
        match val {
            LuaValue::Table(t) => t.borrow().metatable.clone(),
            other => match self.registry.borrow().get_str(&other.type_of().metatable_key()) {
                LuaValue::Table(mt) => Some(mt),
                _ => None,
            },
        }
    }

    pub(crate) fn set_metatable_of(&mut self, val: &LuaValue, mt: Option<TableRef>) {
        match val {
            LuaValue::Table(t) => t.borrow_mut().metatable = mt,
            other => {
                let key = other.type_of().metatable_key();
                let mt = mt.map_or(LuaValue::Nil, LuaValue::Table);
                self.registry.borrow_mut().put_str(&key, mt);
            }
        }
    }

    pub(crate) fn metafield(&self, val: &LuaValue, name: &str) -> LuaValue {
        self.metatable_of(val)
            .map(|mt| mt.borrow().get_str(name))
            .unwrap_or_default()
    }

    /// Call metamethod `name` from `a` or, failing that, `b` with `(a, b)`.
    /// `None` when neither operand has one.
    pub(crate) fn call_metamethod(
        &mut self,
        a: &LuaValue,
        b: &LuaValue,
        name: &str,
    ) -> Result<Option<LuaValue>, LuaError> {
        let mut mm = self.metafield(a, name);
        if mm.is_nil() {
            mm = self.metafield(b, name);
            if mm.is_nil() {
                return Ok(None);
            }
        }
        debug!(metamethod = name, "metamethod fallback");
        self.stack.check(3);
        self.stack.push(mm);
        self.stack.push(a.clone());
        self.stack.push(b.clone());
        self.call(2, 1)?;
        Ok(Some(self.stack.pop()))
    }
}
