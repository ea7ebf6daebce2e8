use crate::compiler::Generator;
use lua_core::opcode::LFIELDS_PER_FLUSH;
use lua_core::{Constant, LuaError, OpCode};
use lua_parser::ast::{BinOp, Exp, FuncCallExp, TableConstructorExp, UnOp};

/// Operand kinds an instruction field accepts.
#[derive(Clone, Copy, PartialEq, Eq)]
struct ArgKinds(u8);

impl ArgKinds {
    const CONST: ArgKinds = ArgKinds(1);
    const REG: ArgKinds = ArgKinds(2);
    const UPVAL: ArgKinds = ArgKinds(4);
    const RK: ArgKinds = ArgKinds(1 | 2);
    const RU: ArgKinds = ArgKinds(2 | 4);

    fn allows(self, kind: ArgKinds) -> bool {
        self.0 & kind.0 != 0
    }
}

impl Generator {
    /// Evaluates `exp` into register `a`. `n` is the number of values wanted:
    /// only calls and `...` honour it, and `-1` keeps every value.
    pub(crate) fn exp(&mut self, exp: &Exp, a: usize, n: i32) -> Result<(), LuaError> {
        match exp {
            Exp::Nil(line) => self.cur.emit_load_nil(*line, a, 1),
            Exp::False(line) => self.cur.emit_load_bool(*line, a, false, false),
            Exp::True(line) => self.cur.emit_load_bool(*line, a, true, false),
            Exp::Integer(line, v) => self.cur.emit_load_k(*line, a, Constant::Integer(*v)),
            Exp::Float(line, v) => self.cur.emit_load_k(*line, a, Constant::Float(*v)),
            Exp::String(line, s) => self.cur.emit_load_k(*line, a, Constant::String(s.clone())),
            Exp::Parens(inner) => self.exp(inner, a, 1)?,
            Exp::Vararg(line) => {
                if !self.cur.is_vararg {
                    return Err(LuaError::Compile(format!(
                        "cannot use '...' outside a vararg function at line {line}"
                    )));
                }
                self.cur.emit_vararg(*line, a, n);
            }
            Exp::FuncDef(fd) => self.func_def_exp(fd, a)?,
            Exp::Table(tc) => self.table_constructor_exp(tc, a)?,
            Exp::Unop { line, op, exp } => self.unop_exp(*line, *op, exp, a)?,
            Exp::Binop { line, op, lhs, rhs } => self.binop_exp(*line, *op, lhs, rhs, a)?,
            Exp::Concat { line, exps } => self.concat_exp(*line, exps, a)?,
            Exp::Name(line, name) => self.name_exp(*line, name, a)?,
            Exp::TableAccess {
                last_line,
                prefix,
                key,
            } => self.table_access_exp(*last_line, prefix, key, a)?,
            Exp::FuncCall(call) => self.func_call_exp(call, a, n)?,
        }
        Ok(())
    }

    fn table_constructor_exp(&mut self, tc: &TableConstructorExp, a: usize) -> Result<(), LuaError> {
        let n_arr = tc.keys.iter().filter(|k| k.is_none()).count();
        let n_exps = tc.keys.len();
        let mult_ret = tc.vals.last().is_some_and(Exp::is_multi_value)
            && tc.keys.last().is_some_and(Option::is_none);
        self.cur.emit_new_table(tc.line, a, n_arr, n_exps - n_arr);

        let per_flush = LFIELDS_PER_FLUSH as usize;
        let mut arr_idx = 0;
        for (i, (key, val)) in tc.keys.iter().zip(&tc.vals).enumerate() {
            let last_open = i == n_exps - 1 && mult_ret;
            match key {
                None => {
                    arr_idx += 1;
                    let tmp = self.cur.alloc_reg()?;
                    self.exp(val, tmp, if last_open { -1 } else { 1 })?;

                    if arr_idx % per_flush == 0 || arr_idx == n_arr {
                        let n = match arr_idx % per_flush {
                            0 => per_flush,
                            n => n,
                        };
                        self.cur.free_regs(n);
                        let c = (arr_idx - 1) / per_flush + 1;
                        let b = if last_open { 0 } else { n };
                        self.cur.emit_set_list(val.last_line(), a, b, c);
                    }
                }
                Some(key) => {
                    let old_regs = self.cur.used_regs;
                    let b = self.exp_to_op_arg(key, ArgKinds::RK)?;
                    let c = self.exp_to_op_arg(val, ArgKinds::RK)?;
                    self.cur.used_regs = old_regs;
                    self.cur.emit_set_table(val.last_line(), a, b, c);
                }
            }
        }
        Ok(())
    }

    fn unop_exp(&mut self, line: u32, op: UnOp, exp: &Exp, a: usize) -> Result<(), LuaError> {
        let old_regs = self.cur.used_regs;
        let b = self.exp_to_op_arg(exp, ArgKinds::REG)?;
        self.cur.emit_unary_op(line, op, a, b);
        self.cur.used_regs = old_regs;
        Ok(())
    }

    fn concat_exp(&mut self, line: u32, exps: &[Exp], a: usize) -> Result<(), LuaError> {
        for exp in exps {
            let r = self.cur.alloc_reg()?;
            self.exp(exp, r, 1)?;
        }
        let c = self.cur.used_regs - 1;
        let b = c + 1 - exps.len();
        self.cur.free_regs(exps.len());
        self.cur.emit_abc(line, OpCode::Concat, a, b, c);
        Ok(())
    }

    fn binop_exp(&mut self, line: u32, op: BinOp, lhs: &Exp, rhs: &Exp, a: usize) -> Result<(), LuaError> {
        let old_regs = self.cur.used_regs;
        match op {
            BinOp::And | BinOp::Or => {
                let b = self.exp_to_op_arg(lhs, ArgKinds::REG)?;
                self.cur.used_regs = old_regs;
                let c = if op == BinOp::And { 0 } else { 1 };
                self.cur.emit_test_set(line, a, b, c);
                let pc_of_jmp = self.cur.emit_jmp(line, 0, 0);

                let b = self.exp_to_op_arg(rhs, ArgKinds::REG)?;
                self.cur.used_regs = old_regs;
                self.cur.emit_move(line, a, b);
                let sbx = self.cur.pc() - pc_of_jmp as i32;
                self.cur.fix_sbx(pc_of_jmp, sbx);
            }
            _ => {
                let b = self.exp_to_op_arg(lhs, ArgKinds::RK)?;
                let c = self.exp_to_op_arg(rhs, ArgKinds::RK)?;
                self.cur.emit_binary_op(line, op, a, b, c);
                self.cur.used_regs = old_regs;
            }
        }
        Ok(())
    }

    fn name_exp(&mut self, line: u32, name: &str, a: usize) -> Result<(), LuaError> {
        if let Some(r) = self.cur.slot_of_loc_var(name) {
            self.cur.emit_move(line, a, r);
        } else if let Some(idx) = self.index_of_upval(name) {
            self.cur.emit_get_upval(line, a, idx);
        } else {
            // x => _ENV.x
            let prefix = Exp::Name(line, "_ENV".to_string());
            let key = Exp::String(line, name.to_string());
            self.table_access_exp(line, &prefix, &key, a)?;
        }
        Ok(())
    }

    fn table_access_exp(&mut self, line: u32, prefix: &Exp, key: &Exp, a: usize) -> Result<(), LuaError> {
        let old_regs = self.cur.used_regs;
        let (b, b_is_upval) = self.exp_to_op_arg_kind(prefix, ArgKinds::RU)?;
        let c = self.exp_to_op_arg(key, ArgKinds::RK)?;
        self.cur.used_regs = old_regs;
        if b_is_upval {
            self.cur.emit_get_tab_up(line, a, b, c);
        } else {
            self.cur.emit_get_table(line, a, b, c);
        }
        Ok(())
    }

    pub(crate) fn func_call_exp(&mut self, call: &FuncCallExp, a: usize, n: i32) -> Result<(), LuaError> {
        let n_args = self.prep_func_call(call, a)?;
        self.cur.emit_call(call.line, a, n_args, n);
        Ok(())
    }

    pub(crate) fn tail_call_exp(&mut self, call: &FuncCallExp, a: usize) -> Result<(), LuaError> {
        let n_args = self.prep_func_call(call, a)?;
        self.cur.emit_tail_call(call.line, a, n_args);
        Ok(())
    }

    /// Loads the callee (and `self` for method calls) at `a` and the arguments
    /// after it; returns the argument count, or -1 when the last one is open.
    fn prep_func_call(&mut self, call: &FuncCallExp, a: usize) -> Result<i32, LuaError> {
        let n_args = call.args.len();
        let mut last_open = false;

        self.exp(&call.prefix, a, 1)?;
        if let Some(method) = &call.method {
            self.cur.alloc_reg()?;
            let key = Exp::String(call.line, method.clone());
            let (c, c_is_reg) = self.exp_to_op_arg_rk(&key)?;
            self.cur.emit_self(call.line, a, a, c);
            if c_is_reg {
                self.cur.free_reg();
            }
        }
        for (i, arg) in call.args.iter().enumerate() {
            let tmp = self.cur.alloc_reg()?;
            if i == n_args - 1 && arg.is_multi_value() {
                last_open = true;
                self.exp(arg, tmp, -1)?;
            } else {
                self.exp(arg, tmp, 1)?;
            }
        }
        self.cur.free_regs(n_args);

        let mut count = n_args as i32;
        if call.method.is_some() {
            self.cur.free_reg();
            count += 1;
        }
        Ok(if last_open { -1 } else { count })
    }

    fn exp_to_op_arg(&mut self, exp: &Exp, kinds: ArgKinds) -> Result<usize, LuaError> {
        Ok(self.exp_to_op_arg_kind(exp, kinds)?.0)
    }

    fn exp_to_op_arg_rk(&mut self, exp: &Exp) -> Result<(usize, bool), LuaError> {
        let arg = self.exp_to_op_arg(exp, ArgKinds::RK)?;
        Ok((arg, arg < 0x100))
    }

    /// Chooses the cheapest operand encoding allowed by `kinds`: an RK
    /// constant, an existing local register, an upvalue, or else a fresh
    /// register holding the evaluated value. The flag is set for upvalues.
    fn exp_to_op_arg_kind(&mut self, exp: &Exp, kinds: ArgKinds) -> Result<(usize, bool), LuaError> {
        if kinds.allows(ArgKinds::CONST) {
            let k = match exp {
                Exp::Nil(_) => Some(Constant::Nil),
                Exp::False(_) => Some(Constant::Boolean(false)),
                Exp::True(_) => Some(Constant::Boolean(true)),
                Exp::Integer(_, v) => Some(Constant::Integer(*v)),
                Exp::Float(_, v) => Some(Constant::Float(*v)),
                Exp::String(_, s) => Some(Constant::String(s.clone())),
                _ => None,
            };
            if let Some(k) = k {
                let idx = self.cur.index_of_constant(k);
                if idx <= 0xFF {
                    return Ok((0x100 + idx, false));
                }
            }
        }
        if let Exp::Name(_, name) = exp {
            if kinds.allows(ArgKinds::REG) {
                if let Some(r) = self.cur.slot_of_loc_var(name) {
                    return Ok((r, false));
                }
            }
            if kinds.allows(ArgKinds::UPVAL) {
                if let Some(idx) = self.index_of_upval(name) {
                    return Ok((idx, true));
                }
            }
        }
        let a = self.cur.alloc_reg()?;
        self.exp(exp, a, 1)?;
        Ok((a, false))
    }
}

#[cfg(test)]
mod tests {
    use crate::compile;
    use lua_core::{Constant, Instruction, OpCode, Prototype};

    fn compile_ok(src: &str) -> Prototype {
        compile(src, "expr").unwrap()
    }

    #[test]
    fn constants_fold_into_rk_operands() {
        let p = compile_ok("local a; local b = a + 1");
        assert_eq!(p.code[1], Instruction::abc(OpCode::Add, 1, 0, 0x100));
        assert_eq!(p.constants, vec![Constant::Integer(1)]);
    }

    #[test]
    fn concat_uses_consecutive_registers() {
        let p = compile_ok("local a, b, c; local d = a .. b .. c");
        let concat = p.code.iter().find(|i| i.opcode() == Some(OpCode::Concat)).unwrap();
        assert_eq!((concat.a(), concat.b(), concat.c()), (3, 4, 6));
    }

    #[test]
    fn unary_operand_goes_through_register() {
        let p = compile_ok("local a; local b = -a");
        assert_eq!(p.code[1], Instruction::abc(OpCode::Unm, 1, 0, 0));
    }

    #[test]
    fn upvalue_table_index_uses_gettabup() {
        let p = compile_ok("local t = string.len");
        assert_eq!(p.code[0].opcode(), Some(OpCode::GetTabUp));
        assert_eq!(p.code[1].opcode(), Some(OpCode::GetTable));
    }

    #[test]
    fn open_call_argument() {
        let p = compile_ok("f(1, g())");
        let calls: Vec<_> = p.code.iter().filter(|i| i.opcode() == Some(OpCode::Call)).collect();
        // inner call keeps every result, outer call takes them all
        assert_eq!(calls[0].c(), 0);
        assert_eq!(calls[1].b(), 0);
    }

    #[test]
    fn parenthesised_call_truncates() {
        let p = compile_ok("f((g()))");
        let calls: Vec<_> = p.code.iter().filter(|i| i.opcode() == Some(OpCode::Call)).collect();
        assert_eq!(calls[0].c(), 2);
        assert_eq!(calls[1].b(), 2);
    }

    #[test]
    fn vararg_requests_exact_count() {
        let p = compile_ok("local a, b = ...");
        assert_eq!(p.code[0], Instruction::abc(OpCode::Vararg, 0, 3, 0));
    }

    #[test]
    fn keyed_fields_use_settable() {
        let p = compile_ok("local t = {x = 1}");
        assert_eq!(p.code[0].opcode(), Some(OpCode::NewTable));
        assert_eq!(p.code[1], Instruction::abc(OpCode::SetTable, 0, 0x100, 0x101));
    }
}
