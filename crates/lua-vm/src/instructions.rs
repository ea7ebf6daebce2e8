//! The execution engine: a fetch/dispatch loop over the running frame.
//!
//! Handlers only touch the frame through the stack API. Register `r` of
//! the running function lives at stack index `r + 1`.

use lua_core::number::fb_to_int;
use lua_core::opcode::LFIELDS_PER_FLUSH;
use lua_core::{Instruction, LuaError, OpCode};
use tracing::trace;

use crate::api::{upvalue_index, ArithOp, CompareOp};
use crate::state::LuaState;
use crate::value::LuaValue;

impl LuaState {
    /// Run the active frame's function until it executes `RETURN`.
    ///
    /// Results are left above the frame's registers.
    pub(crate) fn execute(&mut self) -> Result<(), LuaError> {
        loop {
            let pc = self.pc();
            let inst = self
                .fetch()
                .ok_or_else(|| LuaError::Runtime(format!("pc {pc} ran past the end of the function")))?;
            let op = inst
                .opcode()
                .ok_or_else(|| LuaError::Runtime(format!("invalid opcode at pc {pc}")))?;
            trace!(pc, op = op.name(), "exec");
            self.dispatch(op, inst)?;
            if op == OpCode::Return {
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, op: OpCode, i: Instruction) -> Result<(), LuaError> {
        match op {
            OpCode::Move => self.op_move(i),
            OpCode::LoadK => self.op_load_k(i)?,
            OpCode::LoadKx => self.op_load_kx(i)?,
            OpCode::LoadBool => self.op_load_bool(i),
            OpCode::LoadNil => self.op_load_nil(i),
            OpCode::GetUpval => self.copy(upvalue_index(i.b() + 1), i.a() + 1),
            OpCode::SetUpval => self.copy(i.a() + 1, upvalue_index(i.b() + 1)),
            OpCode::GetTabUp => self.op_get_tab_up(i)?,
            OpCode::SetTabUp => self.op_set_tab_up(i)?,
            OpCode::GetTable => self.op_get_table(i)?,
            OpCode::SetTable => self.op_set_table(i)?,
            OpCode::NewTable => self.op_new_table(i),
            OpCode::Self_ => self.op_self(i)?,
            OpCode::Add => self.binary_arith(i, ArithOp::Add)?,
            OpCode::Sub => self.binary_arith(i, ArithOp::Sub)?,
            OpCode::Mul => self.binary_arith(i, ArithOp::Mul)?,
            OpCode::Mod => self.binary_arith(i, ArithOp::Mod)?,
            OpCode::Pow => self.binary_arith(i, ArithOp::Pow)?,
            OpCode::Div => self.binary_arith(i, ArithOp::Div)?,
            OpCode::IDiv => self.binary_arith(i, ArithOp::IDiv)?,
            OpCode::BAnd => self.binary_arith(i, ArithOp::BAnd)?,
            OpCode::BOr => self.binary_arith(i, ArithOp::BOr)?,
            OpCode::BXor => self.binary_arith(i, ArithOp::BXor)?,
            OpCode::Shl => self.binary_arith(i, ArithOp::Shl)?,
            OpCode::Shr => self.binary_arith(i, ArithOp::Shr)?,
            OpCode::Unm => self.unary_arith(i, ArithOp::Unm)?,
            OpCode::BNot => self.unary_arith(i, ArithOp::BNot)?,
            OpCode::Not => self.op_not(i),
            OpCode::Len => self.op_len(i)?,
            OpCode::Concat => self.op_concat(i)?,
            OpCode::Jmp => self.op_jmp(i),
            OpCode::Eq => self.op_compare(i, CompareOp::Eq)?,
            OpCode::Lt => self.op_compare(i, CompareOp::Lt)?,
            OpCode::Le => self.op_compare(i, CompareOp::Le)?,
            OpCode::Test => self.op_test(i),
            OpCode::TestSet => self.op_test_set(i),
            OpCode::Call => self.op_call(i)?,
            OpCode::TailCall => self.op_tail_call(i)?,
            OpCode::Return => self.op_return(i),
            OpCode::ForLoop => self.op_for_loop(i)?,
            OpCode::ForPrep => self.op_for_prep(i)?,
            OpCode::TForCall => self.op_tfor_call(i)?,
            OpCode::TForLoop => self.op_tfor_loop(i),
            OpCode::SetList => self.op_set_list(i)?,
            OpCode::Closure => self.op_closure(i)?,
            OpCode::Vararg => self.op_vararg(i),
            OpCode::ExtraArg => {}
        }
        Ok(())
    }

    // ── Loads and moves ───────────────────────────────────────────────────────

    /// R(A) := R(B)
    fn op_move(&mut self, i: Instruction) {
        self.copy(i.b() + 1, i.a() + 1);
    }

    /// R(A) := Kst(Bx)
    fn op_load_k(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.get_const(i.bx() as usize)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A) := Kst(extra arg)
    fn op_load_kx(&mut self, i: Instruction) -> Result<(), LuaError> {
        let extra = self
            .fetch()
            .filter(|e| e.opcode() == Some(OpCode::ExtraArg))
            .ok_or_else(|| LuaError::Runtime("LOADKX without EXTRAARG".into()))?;
        self.get_const(extra.ax_arg() as usize)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A) := (Bool)B; if (C) pc++
    fn op_load_bool(&mut self, i: Instruction) {
        self.push_boolean(i.b() != 0);
        self.replace(i.a() + 1);
        if i.c() != 0 {
            self.add_pc(1);
        }
    }

    /// R(A), ..., R(A+B) := nil
    fn op_load_nil(&mut self, i: Instruction) {
        let a = i.a() + 1;
        self.check_stack(1);
        self.push_nil();
        for r in a..=a + i.b() {
            self.copy(-1, r);
        }
        self.pop(1);
    }

    // ── Tables ────────────────────────────────────────────────────────────────

    /// R(A) := UpValue[B][RK(C)]
    fn op_get_tab_up(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.get_rk(i.c())?;
        self.get_table(upvalue_index(i.b() + 1))?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// UpValue[A][RK(B)] := RK(C)
    fn op_set_tab_up(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.get_rk(i.b())?;
        self.get_rk(i.c())?;
        self.set_table(upvalue_index(i.a() + 1))
    }

    /// R(A) := R(B)[RK(C)]
    fn op_get_table(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.get_rk(i.c())?;
        self.get_table(i.b() + 1)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A)[RK(B)] := RK(C)
    fn op_set_table(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.get_rk(i.b())?;
        self.get_rk(i.c())?;
        self.set_table(i.a() + 1)
    }

    /// R(A) := {} (size = B,C)
    fn op_new_table(&mut self, i: Instruction) {
        self.create_table(fb_to_int(i.b() as u32), fb_to_int(i.c() as u32));
        self.replace(i.a() + 1);
    }

    /// R(A+1) := R(B); R(A) := R(B)[RK(C)]
    fn op_self(&mut self, i: Instruction) -> Result<(), LuaError> {
        let (a, b) = (i.a() + 1, i.b() + 1);
        self.copy(b, a + 1);
        self.get_rk(i.c())?;
        self.get_table(b)?;
        self.replace(a);
        Ok(())
    }

    /// R(A)[(C-1)*FPF+i] := R(A+i), 1 <= i <= B
    fn op_set_list(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        let c = if i.c() > 0 {
            i.c()
        } else {
            self.fetch()
                .filter(|e| e.opcode() == Some(OpCode::ExtraArg))
                .ok_or_else(|| LuaError::Runtime("SETLIST without EXTRAARG".into()))?
                .ax_arg()
        };
        let batch = c - 1;

        // B == 0: the items run up to a staged register index, then continue
        // with whatever the last call or vararg left above the registers.
        let open = i.b() == 0;
        let fixed = if open {
            let n = self.to_integer(-1) as i32 - a - 1;
            self.pop(1);
            n
        } else {
            i.b()
        };

        self.check_stack(1);
        let mut idx = i64::from(batch) * i64::from(LFIELDS_PER_FLUSH);
        for j in 1..=fixed {
            idx += 1;
            self.push_value(a + j);
            self.raw_set_i(a, idx)?;
        }
        if open {
            let regs = self.register_count();
            for j in regs + 1..=self.get_top() {
                idx += 1;
                self.push_value(j);
                self.raw_set_i(a, idx)?;
            }
            self.set_top(regs);
        }
        Ok(())
    }

    // ── Operators ─────────────────────────────────────────────────────────────

    /// R(A) := RK(B) op RK(C)
    fn binary_arith(&mut self, i: Instruction, op: ArithOp) -> Result<(), LuaError> {
        self.get_rk(i.b())?;
        self.get_rk(i.c())?;
        self.arith(op)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A) := op R(B)
    fn unary_arith(&mut self, i: Instruction, op: ArithOp) -> Result<(), LuaError> {
        self.push_value(i.b() + 1);
        self.arith(op)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    fn op_not(&mut self, i: Instruction) {
        let b = self.to_boolean(i.b() + 1);
        self.push_boolean(!b);
        self.replace(i.a() + 1);
    }

    fn op_len(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.len(i.b() + 1)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A) := R(B).. ... ..R(C)
    fn op_concat(&mut self, i: Instruction) -> Result<(), LuaError> {
        let (b, c) = (i.b() + 1, i.c() + 1);
        let n = c - b + 1;
        self.check_stack(n as usize);
        for r in b..=c {
            self.push_value(r);
        }
        self.concat(n)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    // ── Control flow ──────────────────────────────────────────────────────────

    /// pc += sBx; if (A) close upvalues >= R(A - 1)
    fn op_jmp(&mut self, i: Instruction) {
        self.add_pc(i.sbx());
        if i.a() != 0 {
            self.close_upvalues(i.a());
        }
    }

    /// if ((RK(B) op RK(C)) ~= A) then pc++
    fn op_compare(&mut self, i: Instruction, op: CompareOp) -> Result<(), LuaError> {
        self.get_rk(i.b())?;
        self.get_rk(i.c())?;
        if self.compare(-2, -1, op)? != (i.a() != 0) {
            self.add_pc(1);
        }
        self.pop(2);
        Ok(())
    }

    /// if not (R(A) <=> C) then pc++
    fn op_test(&mut self, i: Instruction) {
        if self.to_boolean(i.a() + 1) != (i.c() != 0) {
            self.add_pc(1);
        }
    }

    /// if (R(B) <=> C) then R(A) := R(B) else pc++
    fn op_test_set(&mut self, i: Instruction) {
        let b = i.b() + 1;
        if self.to_boolean(b) == (i.c() != 0) {
            self.copy(b, i.a() + 1);
        } else {
            self.add_pc(1);
        }
    }

    /// R(A) -= R(A+2); pc += sBx
    fn op_for_prep(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        for (r, what) in [(a, "initial value"), (a + 1, "limit"), (a + 2, "step")] {
            if matches!(self.get_value(r), LuaValue::Integer(_) | LuaValue::Float(_)) {
                continue;
            }
            match self.to_number_x(r) {
                Some(n) => {
                    self.push_number(n);
                    self.replace(r);
                }
                None => return Err(LuaError::Runtime(format!("'for' {what} must be a number"))),
            }
        }
        self.push_value(a);
        self.push_value(a + 2);
        self.arith(ArithOp::Sub)?;
        self.replace(a);
        self.add_pc(i.sbx());
        Ok(())
    }

    /// R(A) += R(A+2); if R(A) <?= R(A+1) then { pc += sBx; R(A+3) := R(A) }
    fn op_for_loop(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        self.push_value(a + 2);
        self.push_value(a);
        self.arith(ArithOp::Add)?;
        self.replace(a);

        let ascending = self.to_number(a + 2) >= 0.0;
        let more = if ascending {
            self.compare(a, a + 1, CompareOp::Le)?
        } else {
            self.compare(a + 1, a, CompareOp::Le)?
        };
        if more {
            self.add_pc(i.sbx());
            self.copy(a, a + 3);
        }
        Ok(())
    }

    /// R(A+3), ..., R(A+2+C) := R(A)(R(A+1), R(A+2))
    fn op_tfor_call(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        self.push_func_and_args(a, 3);
        self.call(2, i.c())?;
        self.pop_results(a + 3, i.c() + 1);
        Ok(())
    }

    /// if R(A+1) ~= nil then { R(A) := R(A+1); pc += sBx }
    fn op_tfor_loop(&mut self, i: Instruction) {
        let a = i.a() + 1;
        if !self.is_nil(a + 1) {
            self.copy(a + 1, a);
            self.add_pc(i.sbx());
        }
    }

    // ── Calls and functions ───────────────────────────────────────────────────

    /// R(A), ..., R(A+C-2) := R(A)(R(A+1), ..., R(A+B-1))
    fn op_call(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        let n_args = self.push_func_and_args(a, i.b());
        self.call(n_args, i.c() - 1)?;
        self.pop_results(a, i.c());
        Ok(())
    }

    /// return R(A)(R(A+1), ..., R(A+B-1)); every result stays on the stack
    /// for the `RETURN` that follows.
    fn op_tail_call(&mut self, i: Instruction) -> Result<(), LuaError> {
        let a = i.a() + 1;
        let n_args = self.push_func_and_args(a, i.b());
        self.call(n_args, -1)?;
        self.pop_results(a, 0);
        Ok(())
    }

    /// return R(A), ..., R(A+B-2)
    fn op_return(&mut self, i: Instruction) {
        let (a, b) = (i.a() + 1, i.b());
        if b > 1 {
            self.check_stack(b as usize - 1);
            for r in a..a + b - 1 {
                self.push_value(r);
            }
        } else if b == 0 {
            self.fix_stack(a);
        }
    }

    /// R(A) := closure(KPROTO[Bx])
    fn op_closure(&mut self, i: Instruction) -> Result<(), LuaError> {
        self.load_proto(i.bx() as usize)?;
        self.replace(i.a() + 1);
        Ok(())
    }

    /// R(A), R(A+1), ..., R(A+B-2) = vararg
    fn op_vararg(&mut self, i: Instruction) {
        let (a, b) = (i.a() + 1, i.b());
        if b != 1 {
            self.load_vararg(b - 1);
            self.pop_results(a, b);
        }
    }

    // ── Call plumbing ─────────────────────────────────────────────────────────

    /// Push the function at `a` and its arguments; returns the argument
    /// count. `b == 0` takes every value up to the staged top.
    fn push_func_and_args(&mut self, a: i32, b: i32) -> i32 {
        if b >= 1 {
            self.check_stack(b as usize);
            for r in a..a + b {
                self.push_value(r);
            }
            b - 1
        } else {
            self.fix_stack(a);
            self.get_top() - self.register_count() - 1
        }
    }

    /// Move `c - 1` results into registers from `a`, or with `c == 0`
    /// leave them on the stack and stage `a` on top for the consumer.
    fn pop_results(&mut self, a: i32, c: i32) {
        if c == 1 {
            return;
        }
        if c > 1 {
            for r in (a..=a + c - 2).rev() {
                self.replace(r);
            }
        } else {
            self.check_stack(1);
            self.push_integer(i64::from(a));
        }
    }

    /// Turn a staged register index plus the values above the registers
    /// into one contiguous run starting right after the registers: the
    /// registers from `a` up to the staged index are copied in front of
    /// the pending values.
    fn fix_stack(&mut self, a: i32) {
        let x = self.to_integer(-1) as i32;
        self.pop(1);
        self.check_stack((x - a).max(0) as usize);
        for r in a..x {
            self.push_value(r);
        }
        self.rotate(self.register_count() + 1, x - a);
    }
}

#[cfg(test)]
mod tests {
    use lua_core::LuaError;

    use crate::api::LUA_MULTRET;
    use crate::state::LuaState;
    use crate::stdlib::open_base;
    use crate::value::LuaValue;

    fn state() -> LuaState {
        let mut ls = LuaState::new();
        open_base(&mut ls).unwrap();
        ls
    }

    fn run(src: &str) -> Vec<LuaValue> {
        let mut ls = state();
        ls.load(src.as_bytes(), "=test", "t").unwrap();
        ls.call(0, LUA_MULTRET).unwrap();
        (1..=ls.get_top()).map(|i| ls.get_value(i)).collect()
    }

    fn run1(src: &str) -> LuaValue {
        run(src).into_iter().next().unwrap_or_default()
    }

    fn run_err(src: &str) -> LuaError {
        let mut ls = state();
        ls.load(src.as_bytes(), "=test", "t").unwrap();
        ls.call(0, 0).unwrap_err()
    }

    fn ints(vals: &[i64]) -> Vec<LuaValue> {
        vals.iter().map(|&n| LuaValue::Integer(n)).collect()
    }

    fn s(text: &str) -> LuaValue {
        LuaValue::from(text)
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    #[test]
    fn literals() {
        assert_eq!(
            run("return 42, 3.5, 'hi', nil, true"),
            vec![
                LuaValue::Integer(42),
                LuaValue::Float(3.5),
                s("hi"),
                LuaValue::Nil,
                LuaValue::Boolean(true)
            ]
        );
    }

    #[test]
    fn arithmetic_keeps_integer_subtype() {
        assert_eq!(run("local a, b = 7, 2 return a + b, a - b, a * b, a // b, a % b"), ints(&[9, 5, 14, 3, 1]));
        assert_eq!(run1("local a, b = 7, 2 return a / b"), LuaValue::Float(3.5));
        assert_eq!(run1("local a = 2 return a ^ 10"), LuaValue::Float(1024.0));
        assert_eq!(run("local a = -7 return a // 2, a % 2"), ints(&[-4, 1]));
    }

    #[test]
    fn mixed_and_string_operands_promote() {
        assert_eq!(run1("local a = 1 return a + 0.5"), LuaValue::Float(1.5));
        // strings take the float path even when they spell integers
        assert_eq!(run1("local a = '10' return a + 1"), LuaValue::Float(11.0));
        assert_eq!(run1("local a = '0x10' return a * 2"), LuaValue::Float(32.0));
        assert_eq!(run1("local a = '6' return a & 3"), LuaValue::Integer(2));
    }

    #[test]
    fn bitwise_operators() {
        assert_eq!(
            run("local a, b = 6, 3 return a & b, a | b, a ~ b, ~a, a << 1, a >> 1, 1 << 64, a << -1"),
            ints(&[2, 7, 5, -7, 12, 3, 0, 3])
        );
        assert_eq!(run1("local f = 4.0 return f | 1"), LuaValue::Integer(5));
    }

    #[test]
    fn comparison_and_logic() {
        assert_eq!(
            run("local a, b = 1, 2.0 return a < b, a <= b, a == 1.0, 'a' < 'b', not a, nil or 'x', false and 1"),
            vec![
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(false),
                s("x"),
                LuaValue::Boolean(false)
            ]
        );
    }

    #[test]
    fn concat_and_length() {
        assert_eq!(run1("local a, b = 'x', 1 return a .. b .. 2.0"), s("x12.0"));
        assert_eq!(run("local t = {1, 2, 3} return #t, #'four'"), ints(&[3, 4]));
    }

    // ── Statements ───────────────────────────────────────────────────────────

    #[test]
    fn numeric_for_variants() {
        assert_eq!(run1("local s = 0 for i = 1, 10 do s = s + i end return s"), LuaValue::Integer(55));
        assert_eq!(run1("local s = 0 for i = 10, 1, -3 do s = s + i end return s"), LuaValue::Integer(22));
        assert_eq!(run1("local n = 0 for i = 0, 1, 0.25 do n = n + 1 end return n"), LuaValue::Integer(5));
        assert_eq!(run1("local n = 0 for i = '1', '3' do n = n + i end return n"), LuaValue::Float(6.0));
        assert_eq!(run1("local n = 0 for i = 5, 1 do n = n + 1 end return n"), LuaValue::Integer(0));
    }

    #[test]
    fn for_rejects_non_numbers() {
        assert_eq!(
            run_err("for i = 1, {} do end"),
            LuaError::Runtime("'for' limit must be a number".into())
        );
    }

    #[test]
    fn while_repeat_and_break() {
        assert_eq!(
            run("local i = 0 while true do i = i + 1 if i == 5 then break end end local j = 0 repeat j = j + 2 until j >= 7 return i, j"),
            ints(&[5, 8])
        );
    }

    #[test]
    fn if_elseif_else() {
        let src = "local function f(n) if n < 0 then return 'neg' elseif n == 0 then return 'zero' else return 'pos' end end return f(-1), f(0), f(1)";
        assert_eq!(run(src), vec![s("neg"), s("zero"), s("pos")]);
    }

    #[test]
    fn globals_and_multiple_assignment() {
        assert_eq!(run("x, y = 1, 2 x, y = y, x return x, y"), ints(&[2, 1]));
        assert_eq!(
            run("local t, i = {}, 1 t[i], i = i, 2 return t[1], i"),
            ints(&[1, 2])
        );
    }

    #[test]
    fn table_constructors() {
        assert_eq!(
            run("local t = {10, 20, x = 'a', [3] = 30, 40} return t[1], t[2], t[3], t.x"),
            vec![LuaValue::Integer(10), LuaValue::Integer(20), LuaValue::Integer(40), s("a")]
        );
        assert_eq!(run1("local function f() return 1, 2, 3 end local t = {0, f()} return #t"), LuaValue::Integer(4));
    }

    #[test]
    fn set_list_past_one_batch() {
        let items: Vec<String> = (1..=120).map(|n| n.to_string()).collect();
        let src = format!("local t = {{{}}} return #t, t[51], t[120]", items.join(", "));
        assert_eq!(run(&src), ints(&[120, 51, 120]));
    }

    // ── Functions ────────────────────────────────────────────────────────────

    #[test]
    fn recursion() {
        let src = "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end return fib(20)";
        assert_eq!(run1(src), LuaValue::Integer(6765));
    }

    #[test]
    fn closures_share_one_cell() {
        let src = "local x = 0 local function inc() x = x + 1 return x end local a, b = inc, inc return a(), a(), b()";
        assert_eq!(run(src), ints(&[1, 2, 3]));
    }

    #[test]
    fn returned_closures_share_a_cell_across_host_calls() {
        let mut ls = state();
        ls.load(
            b"local x=0; local function inc() x=x+1; return x end; return inc, inc",
            "=share",
            "t",
        )
        .unwrap();
        ls.call(0, 2).unwrap();
        let mut seen = Vec::new();
        for idx in [1, 1, 2] {
            ls.push_value(idx);
            ls.call(0, 1).unwrap();
            seen.push(ls.to_integer(-1));
            ls.pop(1);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn loop_iterations_get_fresh_cells() {
        let src = "local fs = {} for i = 1, 3 do fs[i] = function() return i end end return fs[1](), fs[2](), fs[3]()";
        assert_eq!(run(src), ints(&[1, 2, 3]));
    }

    #[test]
    fn break_out_of_if_closes_its_locals() {
        let src = "local fs = {} \
            for i = 1, 3 do \
                if i == 1 then local y = i * 10; fs[1] = function() return y end; break end \
            end \
            local a, b, c, d, e, f, g, h = 1, 2, 3, 4, 5, 6, 7, 8 \
            return fs[1]()";
        assert_eq!(run1(src), LuaValue::Integer(10));
    }

    #[test]
    fn break_out_of_do_closes_its_locals() {
        let src = "local f \
            while true do do local y = 'kept'; f = function() return y end; break end end \
            local a, b, c, d = 'w', 'x', 'y', 'z' \
            return f()";
        assert_eq!(run1(src), s("kept"));
    }

    #[test]
    fn nested_upvalues() {
        let src = "local function outer() local n = 10 return function() return function() n = n + 1 return n end end end local f = outer()() return f(), f()";
        assert_eq!(run(src), ints(&[11, 12]));
    }

    #[test]
    fn counters_are_independent() {
        let src = "local function counter() local c = 0 return function() c = c + 1 return c end end local a, b = counter(), counter() a() a() return a(), b()";
        assert_eq!(run(src), ints(&[3, 1]));
    }

    #[test]
    fn varargs() {
        let src = "local function f(a, b, ...) return select('#', ...), ... end return f(1, 2, 3, 4, 5)";
        assert_eq!(run(src), ints(&[3, 3, 4, 5]));
        assert_eq!(run1("local function f(...) local a, b = ... return b end return f(1)"), LuaValue::Nil);
        assert_eq!(run1("local function f(...) return {...} end return #f(1, 2, 3)"), LuaValue::Integer(3));
    }

    #[test]
    fn explicit_trailing_nil_is_not_filled_by_a_call() {
        let decl = "local function f() return 1, 2, 3 end local a, b = f(), nil return a, b";
        assert_eq!(run(decl), vec![LuaValue::Integer(1), LuaValue::Nil]);
        let assign = "local function f() return 1, 2, 3 end x, y = f(), nil return x, y";
        assert_eq!(run(assign), vec![LuaValue::Integer(1), LuaValue::Nil]);
    }

    #[test]
    fn multi_return_truncation() {
        let src = "local function three() return 1, 2, 3 end local function one() return 1 end local a, b = three() local x, y, z = one() return a, b, z";
        assert_eq!(run(src), vec![LuaValue::Integer(1), LuaValue::Integer(2), LuaValue::Nil]);
        assert_eq!(run("local function f() return 1, 2 end return f(), f()"), ints(&[1, 1, 2]));
        assert_eq!(run("local function f() return 1, 2 end return (f())"), ints(&[1]));
    }

    #[test]
    fn tail_calls_return_everything() {
        let src = "local function g(n) return n, n * 2 end local function f(n) return g(n + 1) end return f(1)";
        assert_eq!(run(src), ints(&[2, 4]));
    }

    #[test]
    fn method_calls() {
        let src = "local obj = {n = 5} function obj:get(k) return self.n + k end return obj:get(1)";
        assert_eq!(run1(src), LuaValue::Integer(6));
    }

    #[test]
    fn generic_for_with_lua_iterator() {
        let src = "local function range(n) local i = 0 return function() i = i + 1 if i <= n then return i end end end local s = 0 for v in range(4) do s = s + v end return s";
        assert_eq!(run1(src), LuaValue::Integer(10));
    }

    #[test]
    fn generic_for_over_pairs_and_ipairs() {
        let src = "local t = {5, 6, 7, x = 1} local n, s = 0, 0 for k, v in pairs(t) do n = n + 1 end for i, v in ipairs(t) do s = s + i * v end return n, s";
        assert_eq!(run(src), ints(&[4, 38]));
    }

    // ── Metamethods ──────────────────────────────────────────────────────────

    #[test]
    fn index_and_newindex() {
        let src = "
            local log = {}
            local base = {greet = 'hi'}
            local t = setmetatable({}, {__index = base, __newindex = function(t, k, v) rawset(t, k, v * 2) end})
            t.n = 4
            local f = setmetatable({}, {__index = function(t, k) return k .. '!' end})
            return t.greet, t.n, f.x";
        assert_eq!(run(src), vec![s("hi"), LuaValue::Integer(8), s("x!")]);
    }

    #[test]
    fn arithmetic_and_concat_metamethods() {
        let src = "
            local mt = {}
            mt.__add = function(a, b) return a.v + b.v end
            mt.__concat = function(a, b) return 'cat' end
            mt.__unm = function(a) return -a.v end
            mt.__len = function() return 99 end
            local a = setmetatable({v = 1}, mt)
            local b = setmetatable({v = 2}, mt)
            return a + b, a .. 'x', -a, #a";
        assert_eq!(run(src), vec![LuaValue::Integer(3), s("cat"), LuaValue::Integer(-1), LuaValue::Integer(99)]);
    }

    #[test]
    fn comparison_metamethods() {
        let src = "
            local mt = {}
            mt.__eq = function(a, b) return a.v == b.v end
            mt.__lt = function(a, b) return a.v < b.v end
            local a = setmetatable({v = 1}, mt)
            local b = setmetatable({v = 1}, mt)
            local c = setmetatable({v = 2}, mt)
            return a == b, a < c, a <= c, c <= a, rawequal(a, b)";
        assert_eq!(
            run(src),
            vec![
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(true),
                LuaValue::Boolean(false),
                LuaValue::Boolean(false)
            ]
        );
    }

    #[test]
    fn call_metamethod() {
        let src = "local t = setmetatable({}, {__call = function(self, a, b) return a + b end}) return t(2, 3)";
        assert_eq!(run1(src), LuaValue::Integer(5));
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn runtime_errors() {
        assert_eq!(
            run_err("local x return x + 1"),
            LuaError::Arithmetic("attempt to perform arithmetic on a nil value".into())
        );
        assert_eq!(run_err("local t return t.x"), LuaError::Index("nil".into()));
        assert_eq!(run_err("local f = 1 f()"), LuaError::Call("number".into()));
        assert_eq!(
            run_err("return {} < {}"),
            LuaError::Comparison("two table values".into())
        );
        assert_eq!(
            run_err("local a = 1 return a < 'x'"),
            LuaError::Comparison("number with string".into())
        );
        assert_eq!(
            run_err("local a = 1 return a // 0"),
            LuaError::Arithmetic("attempt to perform 'n//0'".into())
        );
        assert_eq!(run_err("local t = {} t[nil] = 1"), LuaError::InvalidKey("nil".into()));
    }

    #[test]
    fn error_unwinds_every_frame() {
        let mut ls = state();
        ls.load(b"local function f() error('boom') end local function g() f() end g()", "=t", "t")
            .unwrap();
        assert_eq!(ls.call(0, 0), Err(LuaError::Runtime("boom".into())));
        assert_eq!(ls.depth(), 0);
        assert_eq!(ls.get_top(), 0);
    }
}
