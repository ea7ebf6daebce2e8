//! Per-function code generation state: register allocation, lexical scopes,
//! constants, upvalues and the instruction buffer.

use std::rc::Rc;

use lua_core::number::int_to_fb;
use lua_core::opcode::{MAXARG_BX, MAXARG_C};
use lua_core::{Constant, Instruction, LocVar, LuaError, OpCode, Prototype, UpvalueDesc};
use lua_parser::ast::{BinOp, UnOp};
use rustc_hash::FxHashMap;

/// Highest register index a function may use.
const MAX_REGS: usize = 255;

/// Hashable identity of a [`Constant`]; floats are keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(String),
}

impl From<&Constant> for ConstKey {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Nil => ConstKey::Nil,
            Constant::Boolean(b) => ConstKey::Boolean(*b),
            Constant::Integer(n) => ConstKey::Integer(*n),
            Constant::Float(f) => ConstKey::Float(f.to_bits()),
            Constant::String(s) => ConstKey::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct LocVarInfo {
    name: String,
    scope_lv: usize,
    slot: usize,
    start_pc: usize,
    end_pc: usize,
    captured: bool,
}

/// A `break` jump awaiting its target, with the locals it leaves behind.
#[derive(Debug)]
struct PendingBreak {
    pc: usize,
    /// Indices into `loc_vars` of the locals active at the `break` that were
    /// declared inside the loop, nested blocks included.
    locals: Vec<usize>,
}

#[derive(Debug, Default)]
pub(crate) struct FuncInfo {
    constants: Vec<Constant>,
    constant_index: FxHashMap<ConstKey, usize>,
    pub(crate) used_regs: usize,
    max_regs: usize,
    scope_lv: usize,
    /// Every local ever declared, for the debug table.
    loc_vars: Vec<LocVarInfo>,
    /// Indices into `loc_vars` of the locals currently in scope, innermost last.
    active: Vec<usize>,
    upvalues: Vec<(String, UpvalueDesc)>,
    /// Pending `break` jumps per scope; `None` for scopes a `break` cannot leave.
    breaks: Vec<Option<Vec<PendingBreak>>>,
    protos: Vec<Rc<Prototype>>,
    num_params: usize,
    pub(crate) is_vararg: bool,
    insts: Vec<Instruction>,
    line_nums: Vec<u32>,
    line: u32,
    last_line: u32,
}

impl FuncInfo {
    pub(crate) fn new(line: u32, last_line: u32, num_params: usize, is_vararg: bool) -> Self {
        Self {
            breaks: vec![None],
            line,
            last_line,
            num_params,
            is_vararg,
            ..Default::default()
        }
    }

    // ── Constants ────────────────────────────────────────────────────────────

    pub(crate) fn index_of_constant(&mut self, k: Constant) -> usize {
        let key = ConstKey::from(&k);
        if let Some(&idx) = self.constant_index.get(&key) {
            return idx;
        }
        let idx = self.constants.len();
        self.constants.push(k);
        self.constant_index.insert(key, idx);
        idx
    }

    // ── Registers ────────────────────────────────────────────────────────────

    pub(crate) fn alloc_reg(&mut self) -> Result<usize, LuaError> {
        self.used_regs += 1;
        if self.used_regs >= MAX_REGS {
            return Err(LuaError::Compile(
                "function or expression needs too many registers".into(),
            ));
        }
        self.max_regs = self.max_regs.max(self.used_regs);
        Ok(self.used_regs - 1)
    }

    pub(crate) fn free_reg(&mut self) {
        self.used_regs = self.used_regs.saturating_sub(1);
    }

    /// Allocates `n` consecutive registers and returns the first.
    pub(crate) fn alloc_regs(&mut self, n: usize) -> Result<usize, LuaError> {
        let first = self.used_regs;
        for _ in 0..n {
            self.alloc_reg()?;
        }
        Ok(first)
    }

    pub(crate) fn free_regs(&mut self, n: usize) {
        self.used_regs = self.used_regs.saturating_sub(n);
    }

    // ── Scopes & locals ──────────────────────────────────────────────────────

    pub(crate) fn enter_scope(&mut self, breakable: bool) {
        self.scope_lv += 1;
        self.breaks.push(breakable.then(Vec::new));
    }

    /// Leaves the innermost scope: patches its `break` jumps to the next
    /// instruction and retires its locals with `end_pc` as their live-range end.
    pub(crate) fn exit_scope(&mut self, end_pc: usize) {
        let pending = self.breaks.pop().flatten().unwrap_or_default();
        for brk in pending {
            // Captures seen after the `break` still count, so decide here.
            let a = self.close_operand(&brk.locals);
            let sbx = self.pc() - brk.pc as i32;
            self.insts[brk.pc] = Instruction::asbx(OpCode::Jmp, a as i32, sbx);
        }
        while let Some(&idx) = self.active.last() {
            if self.loc_vars[idx].scope_lv < self.scope_lv {
                break;
            }
            self.active.pop();
            self.loc_vars[idx].end_pc = end_pc;
            self.free_reg();
        }
        self.scope_lv = self.scope_lv.saturating_sub(1);
    }

    /// Declares a local in the next free register and returns its slot.
    pub(crate) fn add_loc_var(&mut self, name: &str, start_pc: usize) -> Result<usize, LuaError> {
        let slot = self.alloc_reg()?;
        self.active.push(self.loc_vars.len());
        self.loc_vars.push(LocVarInfo {
            name: name.to_string(),
            scope_lv: self.scope_lv,
            slot,
            start_pc,
            end_pc: 0,
            captured: false,
        });
        Ok(slot)
    }

    pub(crate) fn slot_of_loc_var(&self, name: &str) -> Option<usize> {
        self.find_local(name).map(|idx| self.loc_vars[idx].slot)
    }

    fn find_local(&self, name: &str) -> Option<usize> {
        self.active
            .iter()
            .rev()
            .copied()
            .find(|&idx| self.loc_vars[idx].name == name)
    }

    /// Marks a local as captured by a nested function and returns its slot.
    pub(crate) fn capture_local(&mut self, name: &str) -> Option<usize> {
        let idx = self.find_local(name)?;
        self.loc_vars[idx].captured = true;
        Some(self.loc_vars[idx].slot)
    }

    pub(crate) fn add_break_jmp(&mut self, pc: usize, line: u32) -> Result<(), LuaError> {
        let Some(loop_lv) = self.breaks.iter().rposition(Option::is_some) else {
            return Err(LuaError::Compile(format!(
                "<break> at line {line} not inside a loop"
            )));
        };
        let locals = self
            .active
            .iter()
            .copied()
            .filter(|&idx| self.loc_vars[idx].scope_lv >= loop_lv)
            .collect();
        if let Some(jumps) = self.breaks[loop_lv].as_mut() {
            jumps.push(PendingBreak { pc, locals });
        }
        Ok(())
    }

    /// The `A` operand for a jump leaving the current scope: one past the
    /// lowest captured register that must be closed, or 0 when none is.
    pub(crate) fn jmp_arg_a(&self) -> usize {
        let innermost: Vec<usize> = self
            .active
            .iter()
            .copied()
            .filter(|&idx| self.loc_vars[idx].scope_lv == self.scope_lv)
            .collect();
        self.close_operand(&innermost)
    }

    /// One past the lowest named register among `locals` if any of them is
    /// captured, else 0.
    fn close_operand(&self, locals: &[usize]) -> usize {
        let mut has_captured = false;
        let mut min_slot = self.max_regs;
        for &idx in locals {
            let v = &self.loc_vars[idx];
            has_captured |= v.captured;
            if v.slot < min_slot && !v.name.starts_with('(') {
                min_slot = v.slot;
            }
        }
        if has_captured { min_slot + 1 } else { 0 }
    }

    pub(crate) fn close_open_upvals(&mut self, line: u32) {
        let a = self.jmp_arg_a();
        if a > 0 {
            self.emit_jmp(line, a, 0);
        }
    }

    // ── Upvalues ─────────────────────────────────────────────────────────────

    pub(crate) fn upvalue_index(&self, name: &str) -> Option<usize> {
        self.upvalues.iter().position(|(n, _)| n == name)
    }

    pub(crate) fn add_upvalue(&mut self, name: &str, desc: UpvalueDesc) -> usize {
        self.upvalues.push((name.to_string(), desc));
        self.upvalues.len() - 1
    }

    pub(crate) fn add_proto(&mut self, proto: Prototype) -> usize {
        self.protos.push(Rc::new(proto));
        self.protos.len() - 1
    }

    // ── Code ─────────────────────────────────────────────────────────────────

    /// Index of the last emitted instruction (-1 when none).
    pub(crate) fn pc(&self) -> i32 {
        self.insts.len() as i32 - 1
    }

    /// Index the next instruction will get.
    pub(crate) fn next_pc(&self) -> usize {
        self.insts.len()
    }

    pub(crate) fn fix_sbx(&mut self, pc: usize, sbx: i32) {
        self.insts[pc] = self.insts[pc].with_sbx(sbx);
    }

    fn emit(&mut self, line: u32, inst: Instruction) -> usize {
        self.insts.push(inst);
        self.line_nums.push(line);
        self.insts.len() - 1
    }

    pub(crate) fn emit_abc(&mut self, line: u32, op: OpCode, a: usize, b: usize, c: usize) {
        self.emit(line, Instruction::abc(op, a as i32, b as i32, c as i32));
    }

    fn emit_abx(&mut self, line: u32, op: OpCode, a: usize, bx: usize) {
        self.emit(line, Instruction::abx(op, a as i32, bx as i32));
    }

    fn emit_asbx(&mut self, line: u32, op: OpCode, a: usize, sbx: i32) -> usize {
        self.emit(line, Instruction::asbx(op, a as i32, sbx))
    }

    fn emit_ax(&mut self, line: u32, op: OpCode, ax: usize) {
        self.emit(line, Instruction::ax(op, ax as i32));
    }

    pub(crate) fn emit_move(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, OpCode::Move, a, b, 0);
    }

    /// `R(a) .. R(a+n-1) := nil`
    pub(crate) fn emit_load_nil(&mut self, line: u32, a: usize, n: usize) {
        self.emit_abc(line, OpCode::LoadNil, a, n - 1, 0);
    }

    pub(crate) fn emit_load_bool(&mut self, line: u32, a: usize, b: bool, skip: bool) {
        self.emit_abc(line, OpCode::LoadBool, a, b as usize, skip as usize);
    }

    pub(crate) fn emit_load_k(&mut self, line: u32, a: usize, k: Constant) {
        let idx = self.index_of_constant(k);
        if idx <= MAXARG_BX as usize {
            self.emit_abx(line, OpCode::LoadK, a, idx);
        } else {
            self.emit_abx(line, OpCode::LoadKx, a, 0);
            self.emit_ax(line, OpCode::ExtraArg, idx);
        }
    }

    /// `n < 0` loads every extra argument.
    pub(crate) fn emit_vararg(&mut self, line: u32, a: usize, n: i32) {
        self.emit_abc(line, OpCode::Vararg, a, (n + 1) as usize, 0);
    }

    pub(crate) fn emit_closure(&mut self, line: u32, a: usize, bx: usize) {
        self.emit_abx(line, OpCode::Closure, a, bx);
    }

    pub(crate) fn emit_new_table(&mut self, line: u32, a: usize, n_arr: usize, n_rec: usize) {
        self.emit_abc(
            line,
            OpCode::NewTable,
            a,
            int_to_fb(n_arr) as usize,
            int_to_fb(n_rec) as usize,
        );
    }

    pub(crate) fn emit_set_list(&mut self, line: u32, a: usize, b: usize, c: usize) {
        if c <= MAXARG_C as usize {
            self.emit_abc(line, OpCode::SetList, a, b, c);
        } else {
            self.emit_abc(line, OpCode::SetList, a, b, 0);
            self.emit_ax(line, OpCode::ExtraArg, c);
        }
    }

    pub(crate) fn emit_get_table(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::GetTable, a, b, c);
    }

    pub(crate) fn emit_set_table(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::SetTable, a, b, c);
    }

    pub(crate) fn emit_get_upval(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, OpCode::GetUpval, a, b, 0);
    }

    pub(crate) fn emit_set_upval(&mut self, line: u32, a: usize, b: usize) {
        self.emit_abc(line, OpCode::SetUpval, a, b, 0);
    }

    pub(crate) fn emit_get_tab_up(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::GetTabUp, a, b, c);
    }

    pub(crate) fn emit_set_tab_up(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::SetTabUp, a, b, c);
    }

    /// `n_args < 0` / `n_ret < 0` mean "up to top of stack".
    pub(crate) fn emit_call(&mut self, line: u32, a: usize, n_args: i32, n_ret: i32) {
        self.emit_abc(line, OpCode::Call, a, (n_args + 1) as usize, (n_ret + 1) as usize);
    }

    pub(crate) fn emit_tail_call(&mut self, line: u32, a: usize, n_args: i32) {
        self.emit_abc(line, OpCode::TailCall, a, (n_args + 1) as usize, 0);
    }

    pub(crate) fn emit_return(&mut self, line: u32, a: usize, n: i32) {
        self.emit_abc(line, OpCode::Return, a, (n + 1) as usize, 0);
    }

    pub(crate) fn emit_self(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::Self_, a, b, c);
    }

    pub(crate) fn emit_jmp(&mut self, line: u32, a: usize, sbx: i32) -> usize {
        self.emit_asbx(line, OpCode::Jmp, a, sbx)
    }

    pub(crate) fn emit_test(&mut self, line: u32, a: usize, c: usize) {
        self.emit_abc(line, OpCode::Test, a, 0, c);
    }

    pub(crate) fn emit_test_set(&mut self, line: u32, a: usize, b: usize, c: usize) {
        self.emit_abc(line, OpCode::TestSet, a, b, c);
    }

    pub(crate) fn emit_for_prep(&mut self, line: u32, a: usize, sbx: i32) -> usize {
        self.emit_asbx(line, OpCode::ForPrep, a, sbx)
    }

    pub(crate) fn emit_for_loop(&mut self, line: u32, a: usize, sbx: i32) -> usize {
        self.emit_asbx(line, OpCode::ForLoop, a, sbx)
    }

    pub(crate) fn emit_tfor_call(&mut self, line: u32, a: usize, c: usize) {
        self.emit_abc(line, OpCode::TForCall, a, 0, c);
    }

    pub(crate) fn emit_tfor_loop(&mut self, line: u32, a: usize, sbx: i32) {
        self.emit_asbx(line, OpCode::TForLoop, a, sbx);
    }

    pub(crate) fn emit_unary_op(&mut self, line: u32, op: UnOp, a: usize, b: usize) {
        let op = match op {
            UnOp::Not => OpCode::Not,
            UnOp::BNot => OpCode::BNot,
            UnOp::Len => OpCode::Len,
            UnOp::Neg => OpCode::Unm,
        };
        self.emit_abc(line, op, a, b, 0);
    }

    /// Arithmetic goes straight to `R(a)`; comparisons materialise a boolean
    /// through a test, a jump and two `LOADBOOL`s.
    pub(crate) fn emit_binary_op(&mut self, line: u32, op: BinOp, a: usize, b: usize, c: usize) {
        let arith = match op {
            BinOp::Add => Some(OpCode::Add),
            BinOp::Sub => Some(OpCode::Sub),
            BinOp::Mul => Some(OpCode::Mul),
            BinOp::Mod => Some(OpCode::Mod),
            BinOp::Pow => Some(OpCode::Pow),
            BinOp::Div => Some(OpCode::Div),
            BinOp::IDiv => Some(OpCode::IDiv),
            BinOp::BAnd => Some(OpCode::BAnd),
            BinOp::BOr => Some(OpCode::BOr),
            BinOp::BXor => Some(OpCode::BXor),
            BinOp::Shl => Some(OpCode::Shl),
            BinOp::Shr => Some(OpCode::Shr),
            _ => None,
        };
        if let Some(opcode) = arith {
            self.emit_abc(line, opcode, a, b, c);
            return;
        }
        match op {
            BinOp::Eq => self.emit_abc(line, OpCode::Eq, 1, b, c),
            BinOp::Ne => self.emit_abc(line, OpCode::Eq, 0, b, c),
            BinOp::Lt => self.emit_abc(line, OpCode::Lt, 1, b, c),
            BinOp::Gt => self.emit_abc(line, OpCode::Lt, 1, c, b),
            BinOp::Le => self.emit_abc(line, OpCode::Le, 1, b, c),
            BinOp::Ge => self.emit_abc(line, OpCode::Le, 1, c, b),
            _ => {}
        }
        self.emit_jmp(line, 0, 1);
        self.emit_load_bool(line, a, false, true);
        self.emit_load_bool(line, a, true, false);
    }

    // ── Output ───────────────────────────────────────────────────────────────

    pub(crate) fn into_proto(self) -> Prototype {
        let (upvalue_names, upvalues) = self.upvalues.into_iter().unzip();
        Prototype {
            source: String::new(),
            line_defined: self.line,
            last_line_defined: if self.line == 0 { 0 } else { self.last_line },
            num_params: self.num_params as u8,
            is_vararg: self.is_vararg,
            max_stack_size: self.max_regs.max(2) as u8,
            code: self.insts,
            constants: self.constants,
            upvalues,
            protos: self.protos,
            line_info: self.line_nums,
            loc_vars: self
                .loc_vars
                .into_iter()
                .map(|v| LocVar {
                    name: v.name,
                    start_pc: v.start_pc as u32,
                    end_pc: v.end_pc as u32,
                })
                .collect(),
            upvalue_names,
        }
    }

    /// Moves the first nested prototype out; used to unwrap the main function
    /// from its synthetic parent.
    pub(crate) fn take_first_proto(&mut self) -> Option<Prototype> {
        if self.protos.is_empty() {
            return None;
        }
        let rc = self.protos.remove(0);
        Some(Rc::try_unwrap(rc).unwrap_or_else(|rc| (*rc).clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated_by_identity() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        assert_eq!(fi.index_of_constant(Constant::Integer(1)), 0);
        assert_eq!(fi.index_of_constant(Constant::Float(1.0)), 1);
        assert_eq!(fi.index_of_constant(Constant::Integer(1)), 0);
        assert_eq!(fi.index_of_constant(Constant::String("x".into())), 2);
    }

    #[test]
    fn register_high_water_mark() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        assert_eq!(fi.alloc_regs(3).unwrap(), 0);
        fi.free_regs(2);
        assert_eq!(fi.alloc_reg().unwrap(), 1);
        assert_eq!(fi.into_proto().max_stack_size, 3);
    }

    #[test]
    fn register_exhaustion_is_compile_error() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        assert!(matches!(fi.alloc_regs(300), Err(LuaError::Compile(_))));
    }

    #[test]
    fn inner_local_shadows_outer() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        fi.add_loc_var("x", 0).unwrap();
        fi.enter_scope(false);
        fi.add_loc_var("x", 0).unwrap();
        assert_eq!(fi.slot_of_loc_var("x"), Some(1));
        fi.exit_scope(0);
        assert_eq!(fi.slot_of_loc_var("x"), Some(0));
        assert_eq!(fi.used_regs, 1);
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        fi.enter_scope(false);
        assert!(fi.add_break_jmp(0, 3).is_err());
        fi.enter_scope(true);
        assert!(fi.add_break_jmp(0, 3).is_ok());
    }

    #[test]
    fn captured_local_requires_close_on_jump() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        fi.enter_scope(true);
        fi.add_loc_var("a", 0).unwrap();
        assert_eq!(fi.jmp_arg_a(), 0);
        fi.capture_local("a");
        assert_eq!(fi.jmp_arg_a(), 1);
    }

    #[test]
    fn break_closes_locals_of_nested_blocks() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        fi.enter_scope(true);
        fi.add_loc_var("i", 0).unwrap();
        fi.enter_scope(false);
        fi.add_loc_var("y", 0).unwrap();
        let pc = fi.emit_jmp(0, 0, 0);
        fi.add_break_jmp(pc, 1).unwrap();
        // captured after the break was seen
        fi.capture_local("y");
        fi.exit_scope(1);
        fi.exit_scope(1);
        assert_eq!(fi.insts[pc].a(), 1);
    }

    #[test]
    fn large_constant_index_uses_loadkx() {
        let mut fi = FuncInfo::new(0, 0, 0, false);
        for i in 0..=MAXARG_BX as i64 {
            fi.index_of_constant(Constant::Integer(i));
        }
        fi.emit_load_k(1, 0, Constant::Integer(-1));
        let p = fi.into_proto();
        assert_eq!(p.code[0].opcode(), Some(OpCode::LoadKx));
        assert_eq!(p.code[1].opcode(), Some(OpCode::ExtraArg));
        assert_eq!(p.code[1].ax_arg(), MAXARG_BX + 1);
    }
}
