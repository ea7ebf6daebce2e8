use std::rc::Rc;

use lua_core::{Instruction, LuaError, UpvalueDesc};

use crate::closure::{FunctionBody, LuaClosure, LuaProto, Upvalue};
use crate::state::LuaState;
use crate::value::LuaValue;

/// Operations only the instruction handlers need.
impl LuaState {
    fn running_proto(&self) -> Result<Rc<LuaProto>, LuaError> {
        self.stack
            .closure
            .as_ref()
            .and_then(|c| c.proto())
            .cloned()
            .ok_or_else(|| LuaError::Runtime("no Lua function is running".into()))
    }

    pub(crate) fn pc(&self) -> usize {
        self.stack.pc
    }

    pub(crate) fn add_pc(&mut self, n: i32) {
        self.stack.pc = self.stack.pc.wrapping_add_signed(n as isize);
    }

    /// The instruction at the program counter, advancing past it.
    pub(crate) fn fetch(&mut self) -> Option<Instruction> {
        let pc = self.stack.pc;
        self.stack.pc += 1;
        self.stack
            .closure
            .as_ref()?
            .proto()?
            .proto
            .code
            .get(pc)
            .copied()
    }

    /// Push constant `idx` of the running function.
    pub(crate) fn get_const(&mut self, idx: usize) -> Result<(), LuaError> {
        let k = self
            .stack
            .closure
            .as_ref()
            .and_then(|c| c.proto())
            .and_then(|p| p.constants.get(idx))
            .cloned()
            .ok_or_else(|| LuaError::Runtime(format!("constant index {idx} out of range")))?;
        self.stack.push(k);
        Ok(())
    }

    /// Push an RK operand: a constant when the high bit is set, otherwise
    /// a register.
    pub(crate) fn get_rk(&mut self, rk: i32) -> Result<(), LuaError> {
        if lua_core::opcode::is_k(rk) {
            self.get_const(lua_core::opcode::index_k(rk) as usize)
        } else {
            self.push_value(rk + 1);
            Ok(())
        }
    }

    pub(crate) fn register_count(&self) -> i32 {
        self.stack
            .closure
            .as_ref()
            .and_then(|c| c.proto())
            .map_or(0, |p| p.proto.max_stack_size as i32)
    }

    /// Push `n` of the frame's extra arguments, padding with `nil`; all of
    /// them when `n` is negative.
    pub(crate) fn load_vararg(&mut self, n: i32) {
        let n = if n < 0 { self.stack.varargs.len() } else { n as usize };
        self.stack.check(n);
        let varargs = self.stack.varargs.clone();
        self.stack.push_n(varargs, n as i32);
    }

    /// Instantiate nested prototype `idx` and push the closure.
    ///
    /// Register captures share one open cell per register, so sibling
    /// closures see each other's writes.
    pub(crate) fn load_proto(&mut self, idx: usize) -> Result<(), LuaError> {
        let parent = self.running_proto()?;
        let sub = parent
            .protos
            .get(idx)
            .cloned()
            .ok_or_else(|| LuaError::Runtime(format!("function index {idx} out of range")))?;
        let depth = self.callers.len();
        let enclosing = self.stack.closure.clone();

        let upvals = sub
            .proto
            .upvalues
            .iter()
            .map(|desc| match *desc {
                UpvalueDesc::Stack(reg) => {
                    let slot = reg as usize;
                    self.stack
                        .open_upvals
                        .entry(slot)
                        .or_insert_with(|| Upvalue::open(depth, slot))
                        .clone()
                }
                UpvalueDesc::Upvalue(n) => enclosing
                    .as_ref()
                    .and_then(|c| c.upvals.get(n as usize).cloned())
                    .unwrap_or_else(|| Upvalue::closed(LuaValue::Nil)),
            })
            .collect();

        let closure = LuaClosure {
            body: FunctionBody::Lua(sub),
            upvals,
        };
        self.stack.check(1);
        self.stack.push(LuaValue::Function(Rc::new(closure)));
        Ok(())
    }

    /// Close open upvalues for registers `a - 1` and above.
    pub(crate) fn close_upvalues(&mut self, a: i32) {
        self.stack.close_upvalues((a - 1).max(0) as usize);
    }
}
