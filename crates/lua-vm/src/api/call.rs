use std::rc::Rc;

use lua_core::LuaError;
use tracing::debug;

use crate::closure::{FunctionBody, LuaClosure, LuaProto, NativeFn, Upvalue};
use crate::stack::LuaStack;
use crate::state::LuaState;
use crate::value::LuaValue;

/// Loading chunks and calling functions.
impl LuaState {
    /// Load a chunk and push its main function.
    ///
    /// Binary chunks are recognised by their signature; anything else is
    /// compiled as source. `mode` is `"b"`, `"t"` or `"bt"` and restricts
    /// which of the two is accepted. The main function's first upvalue is
    /// bound to the globals table.
    pub fn load(&mut self, chunk: &[u8], chunk_name: &str, mode: &str) -> Result<(), LuaError> {
        let binary = lua_compiler::is_binary_chunk(chunk);
        let kind = if binary { "binary" } else { "text" };
        if !mode.contains(if binary { 'b' } else { 't' }) {
            return Err(LuaError::Runtime(format!(
                "attempt to load a {kind} chunk (mode is '{mode}')"
            )));
        }

        let proto = if binary {
            lua_compiler::undump(chunk)?
        } else {
            let source = std::str::from_utf8(chunk).map_err(|e| LuaError::Syntax {
                line: 1,
                message: format!("source is not valid UTF-8: {e}"),
            })?;
            lua_compiler::compile(source, chunk_name)?
        };
        debug!(chunk = chunk_name, kind, instructions = proto.code.len(), "load chunk");

        let mut closure = LuaClosure::from_proto(LuaProto::new(Rc::new(proto)));
        if let Some(env) = closure.upvals.first_mut() {
            *env = Upvalue::closed(self.globals());
        }
        self.stack.check(1);
        self.stack.push(LuaValue::Function(Rc::new(closure)));
        Ok(())
    }

    /// Call the function sitting below `n_args` arguments on the stack.
    ///
    /// Function and arguments are popped; `n_results` results are pushed,
    /// padded with `nil`, or all of them when `n_results` is
    /// [`LUA_MULTRET`](crate::api::LUA_MULTRET). A non-function is retried
    /// through its `__call` metamethod with itself as the first argument.
    pub fn call(&mut self, n_args: i32, n_results: i32) -> Result<(), LuaError> {
        let fn_idx = -(n_args + 1);
        let mut n_args = n_args;
        let mut val = self.stack.get(fn_idx);

        if !matches!(val, LuaValue::Function(_)) {
            let mm = self.metafield(&val, "__call");
            if matches!(mm, LuaValue::Function(_)) {
                debug!("__call fallback for a {}", val.type_name());
                self.stack.set(fn_idx, mm.clone());
                self.stack.check(1);
                self.stack.push(val);
                self.insert(fn_idx);
                n_args += 1;
                val = mm;
            }
        }

        let LuaValue::Function(closure) = val else {
            return Err(LuaError::Call(val.type_name().into()));
        };
        if self.callers.len() >= self.config.max_call_depth {
            return Err(LuaError::StackOverflow);
        }
        match &closure.body {
            FunctionBody::Lua(proto) => {
                let proto = proto.clone();
                self.call_lua_closure(n_args as usize, n_results, closure, proto)
            }
            FunctionBody::Native(f) => {
                let f = *f;
                self.call_native(n_args as usize, n_results, closure, f)
            }
        }
    }

    fn call_lua_closure(
        &mut self,
        n_args: usize,
        n_results: i32,
        closure: Rc<LuaClosure>,
        proto: Rc<LuaProto>,
    ) -> Result<(), LuaError> {
        let p = &proto.proto;
        let n_regs = p.max_stack_size as usize;
        let n_params = p.num_params as usize;

        let mut args = self.stack.pop_n(n_args + 1).split_off(1);
        let varargs = if p.is_vararg && args.len() > n_params {
            args.split_off(n_params)
        } else {
            Vec::new()
        };

        let mut frame = LuaStack::new(n_regs + self.config.min_stack, Some(closure));
        frame.push_n(args, n_params as i32);
        while frame.top() < n_regs {
            frame.push(LuaValue::Nil);
        }
        frame.varargs = varargs;

        self.push_frame(frame);
        let outcome = self.execute();
        let mut frame = self.pop_frame();
        outcome?;

        if n_results != 0 {
            let results = frame.pop_n(frame.top().saturating_sub(n_regs));
            self.push_results(results, n_results);
        }
        Ok(())
    }

    fn call_native(
        &mut self,
        n_args: usize,
        n_results: i32,
        closure: Rc<LuaClosure>,
        f: NativeFn,
    ) -> Result<(), LuaError> {
        let mut frame = LuaStack::new(n_args + self.config.min_stack, Some(closure));
        frame.push_n(self.stack.pop_n(n_args), n_args as i32);
        self.stack.pop();

        self.push_frame(frame);
        let outcome = f(self);
        let mut frame = self.pop_frame();
        let n = outcome?;

        if n_results != 0 {
            let results = frame.pop_n(n);
            self.push_results(results, n_results);
        }
        Ok(())
    }

    fn push_results(&mut self, results: Vec<LuaValue>, n_results: i32) {
        let n = if n_results < 0 { results.len() } else { n_results as usize };
        self.stack.check(n);
        self.stack.push_n(results, n_results);
    }
}

#[cfg(test)]
mod tests {
    use crate::api::LUA_MULTRET;
    use crate::config::Config;
    use crate::state::LuaState;
    use lua_core::LuaError;

    fn add(ls: &mut LuaState) -> Result<usize, LuaError> {
        let sum = ls.to_integer(1) + ls.to_integer(2);
        ls.push_integer(sum);
        Ok(1)
    }

    #[test]
    fn native_call_truncates_and_pads() {
        let mut ls = LuaState::new();
        ls.push_native_function(add);
        ls.push_integer(2);
        ls.push_integer(3);
        ls.call(2, 3).unwrap();
        assert_eq!(ls.get_top(), 3);
        assert_eq!(ls.to_integer(1), 5);
        assert!(ls.is_nil(3));
    }

    #[test]
    fn load_text_and_run() {
        let mut ls = LuaState::new();
        ls.load(b"local a, b = ... return a * b, 'done'", "=test", "bt")
            .unwrap();
        ls.push_integer(6);
        ls.push_integer(7);
        ls.call(2, LUA_MULTRET).unwrap();
        assert_eq!(ls.get_top(), 2);
        assert_eq!(ls.to_integer(1), 42);
        assert_eq!(&*ls.to_string(2), "done");
    }

    #[test]
    fn load_binary_chunk() {
        let proto = lua_compiler::compile("return 1 + 1", "=bin").unwrap();
        let bytes = lua_compiler::dump(&proto);
        let mut ls = LuaState::new();
        assert!(ls.load(&bytes, "bin", "t").is_err());
        ls.load(&bytes, "bin", "b").unwrap();
        ls.call(0, 1).unwrap();
        assert_eq!(ls.to_integer(-1), 2);
    }

    #[test]
    fn load_mode_rejects_text() {
        let mut ls = LuaState::new();
        assert!(ls.load(b"return 1", "=t", "b").is_err());
    }

    #[test]
    fn calling_a_non_function() {
        let mut ls = LuaState::new();
        ls.push_integer(1);
        assert_eq!(ls.call(0, 0), Err(LuaError::Call("number".into())));
    }

    #[test]
    fn depth_limit_is_configurable() {
        let mut ls = LuaState::with_config(Config {
            max_call_depth: 10,
            ..Config::default()
        });
        ls.load(b"local function f(n) return f(n + 1) end return f(0)", "=deep", "t")
            .unwrap();
        assert_eq!(ls.call(0, 0), Err(LuaError::StackOverflow));
        assert_eq!(ls.depth(), 0);
    }
}
