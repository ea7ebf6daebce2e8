use std::mem;
use std::rc::Rc;

use crate::func_info::FuncInfo;
use lua_core::{Constant, LuaError, Prototype, UpvalueDesc};
use lua_parser::ast::{Block, Exp, ForInStat, ForNumStat, FuncDefExp, Stat};

/// Compile Lua source text into the main function's [`Prototype`].
pub fn compile(source: &str, chunk_name: &str) -> Result<Prototype, LuaError> {
    let block = lua_parser::parse(source)?;
    generate(&block, chunk_name)
}

/// Lower an already-parsed chunk.
///
/// The chunk becomes a vararg function whose only upvalue is `_ENV`, captured
/// from a synthetic enclosing function that declares `_ENV` in register 0.
pub fn generate(block: &Block, chunk_name: &str) -> Result<Prototype, LuaError> {
    let main = FuncDefExp {
        line: 0,
        last_line: block.last_line,
        params: Vec::new(),
        is_vararg: true,
        block: block.clone(),
    };
    let mut outer = FuncInfo::new(0, 0, 0, false);
    outer.add_loc_var("_ENV", 0)?;
    let mut generator = Generator {
        cur: outer,
        parents: Vec::new(),
    };
    generator.func_def_exp(&main, 0)?;
    let mut proto = generator
        .cur
        .take_first_proto()
        .ok_or_else(|| LuaError::Compile("main function was not generated".into()))?;
    set_source(&mut proto, chunk_name);
    tracing::debug!(
        chunk = chunk_name,
        functions = proto.count_functions(),
        "generated chunk"
    );
    Ok(proto)
}

fn set_source(proto: &mut Prototype, chunk_name: &str) {
    proto.source = chunk_name.to_string();
    for child in &mut proto.protos {
        set_source(Rc::make_mut(child), chunk_name);
    }
}

/// Walks the tree for one chunk. `cur` is the function being emitted;
/// `parents` holds its lexically enclosing functions, outermost first.
pub(crate) struct Generator {
    pub(crate) cur: FuncInfo,
    parents: Vec<FuncInfo>,
}

// ── Functions & upvalues ─────────────────────────────────────────────────────

impl Generator {
    /// Emits `CLOSURE a` for a nested function after generating its body.
    pub(crate) fn func_def_exp(&mut self, fd: &FuncDefExp, a: usize) -> Result<(), LuaError> {
        let child = FuncInfo::new(fd.line, fd.last_line, fd.params.len(), fd.is_vararg);
        self.parents.push(mem::replace(&mut self.cur, child));

        let body = self.func_body(fd);
        let child = match self.parents.pop() {
            Some(parent) => mem::replace(&mut self.cur, parent),
            None => mem::take(&mut self.cur),
        };
        body?;

        let proto = child.into_proto();
        tracing::debug!(
            line = proto.line_defined,
            instructions = proto.code.len(),
            registers = proto.max_stack_size,
            "generated function"
        );
        let bx = self.cur.add_proto(proto);
        self.cur.emit_closure(fd.last_line, a, bx);
        Ok(())
    }

    fn func_body(&mut self, fd: &FuncDefExp) -> Result<(), LuaError> {
        // The main function always carries `_ENV` as upvalue 0.
        if self.parents.len() == 1 {
            self.index_of_upval("_ENV");
        }
        for param in &fd.params {
            self.cur.add_loc_var(param, 0)?;
        }
        self.block(&fd.block)?;
        let end_pc = self.cur.next_pc() + 1;
        self.cur.exit_scope(end_pc);
        self.cur.emit_return(fd.last_line, 0, 0);
        Ok(())
    }

    /// Resolves `name` as an upvalue of the current function, threading the
    /// capture through every enclosing function that does not declare it.
    pub(crate) fn index_of_upval(&mut self, name: &str) -> Option<usize> {
        resolve_upvalue(&mut self.cur, &mut self.parents, name)
    }
}

fn resolve_upvalue(cur: &mut FuncInfo, parents: &mut [FuncInfo], name: &str) -> Option<usize> {
    if let Some(idx) = cur.upvalue_index(name) {
        return Some(idx);
    }
    let (parent, grandparents) = parents.split_last_mut()?;
    if let Some(slot) = parent.capture_local(name) {
        return Some(cur.add_upvalue(name, UpvalueDesc::Stack(slot as u8)));
    }
    let idx = resolve_upvalue(parent, grandparents, name)?;
    Some(cur.add_upvalue(name, UpvalueDesc::Upvalue(idx as u8)))
}

// ── Blocks & statements ──────────────────────────────────────────────────────

impl Generator {
    fn block(&mut self, block: &Block) -> Result<(), LuaError> {
        for stat in &block.stats {
            self.stat(stat)?;
        }
        if let Some(exps) = &block.ret_exps {
            self.ret_stat(exps, block.last_line)?;
        }
        Ok(())
    }

    fn ret_stat(&mut self, exps: &[Exp], last_line: u32) -> Result<(), LuaError> {
        let n = exps.len();
        if n == 0 {
            self.cur.emit_return(last_line, 0, 0);
            return Ok(());
        }
        if n == 1 {
            if let Exp::Name(_, name) = &exps[0] {
                if let Some(r) = self.cur.slot_of_loc_var(name) {
                    self.cur.emit_return(last_line, r, 1);
                    return Ok(());
                }
            }
            if let Exp::FuncCall(call) = &exps[0] {
                let r = self.cur.alloc_reg()?;
                self.tail_call_exp(call, r)?;
                self.cur.free_reg();
                self.cur.emit_return(last_line, r, -1);
                return Ok(());
            }
        }
        let mult_ret = exps[n - 1].is_multi_value();
        for (i, exp) in exps.iter().enumerate() {
            let r = self.cur.alloc_reg()?;
            let want = if i == n - 1 && mult_ret { -1 } else { 1 };
            self.exp(exp, r, want)?;
        }
        self.cur.free_regs(n);
        let a = self.cur.used_regs;
        let count = if mult_ret { -1 } else { n as i32 };
        self.cur.emit_return(last_line, a, count);
        Ok(())
    }

    fn stat(&mut self, stat: &Stat) -> Result<(), LuaError> {
        match stat {
            Stat::Empty => Ok(()),
            Stat::FuncCall(call) => {
                let r = self.cur.alloc_reg()?;
                self.func_call_exp(call, r, 0)?;
                self.cur.free_reg();
                Ok(())
            }
            Stat::Break(line) => {
                let pc = self.cur.emit_jmp(*line, 0, 0);
                self.cur.add_break_jmp(pc, *line)
            }
            Stat::Do(block) => {
                self.cur.enter_scope(false);
                self.block(block)?;
                self.cur.close_open_upvals(block.last_line);
                let end = self.cur.next_pc();
                self.cur.exit_scope(end);
                Ok(())
            }
            Stat::While { exp, block } => self.while_stat(exp, block),
            Stat::Repeat { block, exp } => self.repeat_stat(block, exp),
            Stat::If { exps, blocks } => self.if_stat(exps, blocks),
            Stat::ForNum(f) => self.for_num_stat(f),
            Stat::ForIn(f) => self.for_in_stat(f),
            Stat::LocalVarDecl {
                last_line,
                names,
                exps,
            } => self.local_var_decl(*last_line, names, exps),
            Stat::Assign {
                last_line,
                vars,
                exps,
            } => self.assign_stat(*last_line, vars, exps),
            Stat::LocalFuncDef { name, func } => {
                let start_pc = self.cur.next_pc() + 1;
                let r = self.cur.add_loc_var(name, start_pc)?;
                self.func_def_exp(func, r)
            }
            Stat::Label(name) => Err(LuaError::Compile(format!(
                "label '::{name}::' is not supported"
            ))),
            Stat::Goto(name) => Err(LuaError::Compile(format!(
                "'goto {name}' is not supported"
            ))),
        }
    }

    //            ______________
    //           /  false? jmp  |
    //          /               |
    // while exp do block end <-'
    //       ^           \
    //       |___________/
    //            jmp
    fn while_stat(&mut self, exp: &Exp, block: &Block) -> Result<(), LuaError> {
        let pc_before_exp = self.cur.pc();
        let line = exp.line();

        let r = self.cur.alloc_reg()?;
        self.exp(exp, r, 1)?;
        self.cur.free_reg();

        self.cur.emit_test(line, r, 0);
        let pc_jmp_to_end = self.cur.emit_jmp(line, 0, 0);

        self.cur.enter_scope(true);
        self.block(block)?;
        self.cur.close_open_upvals(block.last_line);
        let back = pc_before_exp - self.cur.pc() - 1;
        self.cur.emit_jmp(block.last_line, 0, back);
        let end = self.cur.next_pc();
        self.cur.exit_scope(end);

        let sbx = self.cur.pc() - pc_jmp_to_end as i32;
        self.cur.fix_sbx(pc_jmp_to_end, sbx);
        Ok(())
    }

    //         ______________
    //        |  false? jmp  |
    //        V              /
    // repeat block until exp
    fn repeat_stat(&mut self, block: &Block, exp: &Exp) -> Result<(), LuaError> {
        self.cur.enter_scope(true);

        let pc_before_block = self.cur.pc();
        self.block(block)?;

        let line = exp.line();
        let r = self.cur.alloc_reg()?;
        self.exp(exp, r, 1)?;
        self.cur.free_reg();

        self.cur.emit_test(line, r, 0);
        let a = self.cur.jmp_arg_a();
        let back = pc_before_block - self.cur.pc() - 1;
        self.cur.emit_jmp(line, a, back);
        self.cur.close_open_upvals(line);

        let end = self.cur.next_pc() + 1;
        self.cur.exit_scope(end);
        Ok(())
    }

    fn if_stat(&mut self, exps: &[Exp], blocks: &[Block]) -> Result<(), LuaError> {
        let mut pc_jmp_to_ends = Vec::with_capacity(exps.len());
        let mut pc_jmp_to_next_exp: Option<usize> = None;

        for (i, (exp, block)) in exps.iter().zip(blocks).enumerate() {
            if let Some(pc) = pc_jmp_to_next_exp {
                let sbx = self.cur.pc() - pc as i32;
                self.cur.fix_sbx(pc, sbx);
            }

            let line = exp.line();
            let r = self.cur.alloc_reg()?;
            self.exp(exp, r, 1)?;
            self.cur.free_reg();

            self.cur.emit_test(line, r, 0);
            let pc = self.cur.emit_jmp(line, 0, 0);
            pc_jmp_to_next_exp = Some(pc);

            self.cur.enter_scope(false);
            self.block(block)?;
            self.cur.close_open_upvals(block.last_line);
            let end = self.cur.next_pc();
            self.cur.exit_scope(end);

            if i < exps.len() - 1 {
                pc_jmp_to_ends.push(self.cur.emit_jmp(block.last_line, 0, 0));
            } else {
                pc_jmp_to_ends.push(pc);
            }
        }

        for pc in pc_jmp_to_ends {
            let sbx = self.cur.pc() - pc as i32;
            self.cur.fix_sbx(pc, sbx);
        }
        Ok(())
    }

    fn for_num_stat(&mut self, f: &ForNumStat) -> Result<(), LuaError> {
        self.cur.enter_scope(true);

        self.local_var_decl(
            f.line_of_for,
            &[
                "(for index)".to_string(),
                "(for limit)".to_string(),
                "(for step)".to_string(),
            ],
            &[f.init.clone(), f.limit.clone(), f.step.clone()],
        )?;
        let start_pc = self.cur.next_pc() + 1;
        self.cur.add_loc_var(&f.var_name, start_pc)?;

        let a = self.cur.used_regs - 4;
        let pc_for_prep = self.cur.emit_for_prep(f.line_of_do, a, 0);
        self.block(&f.block)?;
        self.cur.close_open_upvals(f.block.last_line);
        let pc_for_loop = self.cur.emit_for_loop(f.line_of_for, a, 0);

        self.cur
            .fix_sbx(pc_for_prep, pc_for_loop as i32 - pc_for_prep as i32 - 1);
        self.cur
            .fix_sbx(pc_for_loop, pc_for_prep as i32 - pc_for_loop as i32);

        let end = self.cur.next_pc();
        self.cur.exit_scope(end);
        Ok(())
    }

    fn for_in_stat(&mut self, f: &ForInStat) -> Result<(), LuaError> {
        self.cur.enter_scope(true);

        self.local_var_decl(
            f.line_of_do,
            &[
                "(for generator)".to_string(),
                "(for state)".to_string(),
                "(for control)".to_string(),
            ],
            &f.exps,
        )?;
        let start_pc = self.cur.next_pc() + 2;
        for name in &f.names {
            self.cur.add_loc_var(name, start_pc)?;
        }

        let pc_jmp_to_tfc = self.cur.emit_jmp(f.line_of_do, 0, 0);
        self.block(&f.block)?;
        self.cur.close_open_upvals(f.block.last_line);
        let sbx = self.cur.pc() - pc_jmp_to_tfc as i32;
        self.cur.fix_sbx(pc_jmp_to_tfc, sbx);

        let line = f.line_of_do;
        let r_generator = self
            .cur
            .slot_of_loc_var("(for generator)")
            .ok_or_else(|| LuaError::Compile("generic for lost its generator".into()))?;
        self.cur.emit_tfor_call(line, r_generator, f.names.len());
        let back = pc_jmp_to_tfc as i32 - self.cur.pc() - 1;
        self.cur.emit_tfor_loop(line, r_generator + 2, back);

        let end = self.cur.next_pc();
        self.cur.exit_scope(end);
        Ok(())
    }

    fn local_var_decl(&mut self, line: u32, names: &[String], exps: &[Exp]) -> Result<(), LuaError> {
        let old_regs = self.cur.used_regs;
        self.adjust_exps(line, exps, names.len())?;
        self.cur.used_regs = old_regs;

        let start_pc = self.cur.next_pc();
        for name in names {
            self.cur.add_loc_var(name, start_pc)?;
        }
        Ok(())
    }

    /// Evaluates `exps` into consecutive fresh registers so that exactly
    /// `n_wanted` values result: extra values are discarded, missing values are
    /// supplied by a trailing call or vararg, or else padded with nil.
    fn adjust_exps(&mut self, line: u32, exps: &[Exp], n_wanted: usize) -> Result<(), LuaError> {
        let n_exps = exps.len();
        if n_exps >= n_wanted {
            for (i, exp) in exps.iter().enumerate() {
                let a = self.cur.alloc_reg()?;
                let want = if i >= n_wanted && i == n_exps - 1 && exp.is_multi_value() {
                    0
                } else {
                    1
                };
                self.exp(exp, a, want)?;
            }
            return Ok(());
        }
        let mut mult_ret = false;
        for (i, exp) in exps.iter().enumerate() {
            let a = self.cur.alloc_reg()?;
            if i == n_exps - 1 && exp.is_multi_value() {
                mult_ret = true;
                let n = n_wanted - n_exps + 1;
                self.exp(exp, a, n as i32)?;
                self.cur.alloc_regs(n - 1)?;
            } else {
                self.exp(exp, a, 1)?;
            }
        }
        if !mult_ret {
            let n = n_wanted - n_exps;
            let a = self.cur.alloc_regs(n)?;
            self.cur.emit_load_nil(line, a, n);
        }
        Ok(())
    }

    fn assign_stat(&mut self, last_line: u32, vars: &[Exp], exps: &[Exp]) -> Result<(), LuaError> {
        let n_vars = vars.len();
        let old_regs = self.cur.used_regs;

        // Table and key operands are evaluated before any value.
        let mut t_regs = vec![0; n_vars];
        let mut k_regs: Vec<Option<usize>> = vec![None; n_vars];
        for (i, var) in vars.iter().enumerate() {
            match var {
                Exp::TableAccess { prefix, key, .. } => {
                    let t = self.cur.alloc_reg()?;
                    self.exp(prefix, t, 1)?;
                    let k = self.cur.alloc_reg()?;
                    self.exp(key, k, 1)?;
                    t_regs[i] = t;
                    k_regs[i] = Some(k);
                }
                Exp::Name(line, name) => {
                    if self.cur.slot_of_loc_var(name).is_none()
                        && self.index_of_upval(name).is_none()
                    {
                        let idx = self.cur.index_of_constant(Constant::String(name.clone()));
                        if idx > 0xFF {
                            let k = self.cur.alloc_reg()?;
                            self.cur.emit_load_k(*line, k, Constant::String(name.clone()));
                            k_regs[i] = Some(k);
                        }
                    }
                }
                _ => return Err(LuaError::Compile("cannot assign to this expression".into())),
            }
        }

        let first_val = self.cur.used_regs;
        self.adjust_exps(last_line, exps, n_vars)?;

        for (i, var) in vars.iter().enumerate() {
            let v = first_val + i;
            match var {
                Exp::Name(_, name) => {
                    if let Some(a) = self.cur.slot_of_loc_var(name) {
                        self.cur.emit_move(last_line, a, v);
                    } else if let Some(b) = self.index_of_upval(name) {
                        self.cur.emit_set_upval(last_line, v, b);
                    } else {
                        let key = match k_regs[i] {
                            Some(k) => k,
                            None => 0x100 + self.cur.index_of_constant(Constant::String(name.clone())),
                        };
                        if let Some(env) = self.cur.slot_of_loc_var("_ENV") {
                            self.cur.emit_set_table(last_line, env, key, v);
                        } else {
                            let env = self.index_of_upval("_ENV").ok_or_else(|| {
                                LuaError::Compile("no _ENV in scope for global assignment".into())
                            })?;
                            self.cur.emit_set_tab_up(last_line, env, key, v);
                        }
                    }
                }
                _ => {
                    let k = k_regs[i].unwrap_or_default();
                    self.cur.emit_set_table(last_line, t_regs[i], k, v);
                }
            }
        }

        self.cur.used_regs = old_regs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lua_core::{Instruction, OpCode};

    fn compile_ok(src: &str) -> Prototype {
        compile(src, "test").unwrap()
    }

    fn compile_err(src: &str) -> LuaError {
        compile(src, "test").unwrap_err()
    }

    fn opcodes(p: &Prototype) -> Vec<OpCode> {
        p.code.iter().filter_map(|i| i.opcode()).collect()
    }

    #[test]
    fn empty_chunk_returns() {
        let p = compile_ok("");
        assert_eq!(opcodes(&p), vec![OpCode::Return]);
        assert!(p.is_vararg);
        assert_eq!(p.upvalues, vec![UpvalueDesc::Stack(0)]);
        assert_eq!(p.upvalue_names, vec!["_ENV"]);
        assert_eq!(p.source, "test");
        assert!(p.max_stack_size >= 2);
    }

    #[test]
    fn global_read_uses_gettabup() {
        let p = compile_ok("local x = y");
        assert_eq!(opcodes(&p), vec![OpCode::GetTabUp, OpCode::Return]);
        assert_eq!(p.constants, vec![Constant::String("y".into())]);
        assert_eq!(p.code[0], Instruction::abc(OpCode::GetTabUp, 0, 0, 0x100));
    }

    #[test]
    fn global_write_uses_settabup() {
        let p = compile_ok("x = 1");
        assert_eq!(p.code[0].opcode(), Some(OpCode::LoadK));
        assert_eq!(p.code[1], Instruction::abc(OpCode::SetTabUp, 0, 0x100, 0));
    }

    #[test]
    fn missing_values_are_padded_with_loadnil() {
        let p = compile_ok("local a, b, c = 1");
        assert_eq!(opcodes(&p), vec![OpCode::LoadK, OpCode::LoadNil, OpCode::Return]);
        assert_eq!(p.code[1], Instruction::abc(OpCode::LoadNil, 1, 1, 0));
        assert_eq!(p.loc_vars.len(), 3);
    }

    #[test]
    fn trailing_call_fills_missing_values() {
        let p = compile_ok("local a, b = f()");
        let call = p.code[1];
        assert_eq!(call.opcode(), Some(OpCode::Call));
        assert_eq!(call.c(), 3);
    }

    #[test]
    fn extra_call_results_are_discarded() {
        let p = compile_ok("local a = 1, f()");
        let call = p.code.iter().find(|i| i.opcode() == Some(OpCode::Call)).unwrap();
        assert_eq!(call.c(), 1);
    }

    #[test]
    fn explicit_nil_keeps_call_to_one_result() {
        for src in ["local a, b = f(), nil", "x, y = f(), nil"] {
            let p = compile_ok(src);
            let call = p.code.iter().find(|i| i.opcode() == Some(OpCode::Call)).unwrap();
            assert_eq!(call.c(), 2, "{src}");
            assert!(opcodes(&p).contains(&OpCode::LoadNil), "{src}");
        }
    }

    #[test]
    fn comparison_materialises_boolean() {
        let p = compile_ok("local a, b; local c = a < b");
        assert_eq!(
            &opcodes(&p)[1..5],
            &[OpCode::Lt, OpCode::Jmp, OpCode::LoadBool, OpCode::LoadBool]
        );
    }

    #[test]
    fn and_uses_testset() {
        let p = compile_ok("local a, b; local c = a and b");
        assert_eq!(
            &opcodes(&p)[1..4],
            &[OpCode::TestSet, OpCode::Jmp, OpCode::Move]
        );
    }

    #[test]
    fn numeric_for_jumps_are_patched() {
        let p = compile_ok("for i = 1, 3 do end");
        let prep = p.code.iter().position(|i| i.opcode() == Some(OpCode::ForPrep)).unwrap();
        let lp = p.code.iter().position(|i| i.opcode() == Some(OpCode::ForLoop)).unwrap();
        assert_eq!(prep as i32 + 1 + p.code[prep].sbx(), lp as i32);
        assert_eq!(lp as i32 + 1 + p.code[lp].sbx(), prep as i32 + 1);
    }

    #[test]
    fn generic_for_layout() {
        let p = compile_ok("for k, v in pairs(t) do end");
        let ops = opcodes(&p);
        let tfc = ops.iter().position(|&o| o == OpCode::TForCall).unwrap();
        assert_eq!(ops[tfc + 1], OpCode::TForLoop);
        assert_eq!(p.code[tfc].c(), 2);
        let tfl = tfc + 1;
        assert_eq!(p.code[tfl].a(), p.code[tfc].a() + 2);
    }

    #[test]
    fn break_jumps_past_loop() {
        let p = compile_ok("while true do break end local z = 1");
        let brk = 3;
        assert_eq!(p.code[brk].opcode(), Some(OpCode::Jmp));
        let target = brk as i32 + 1 + p.code[brk].sbx();
        assert_eq!(p.code[target as usize].opcode(), Some(OpCode::LoadK));
    }

    /// Forward jumps that also close upvalues from register `a - 1` up.
    fn closing_exits(p: &Prototype, a: i32) -> usize {
        p.code
            .iter()
            .filter(|i| i.opcode() == Some(OpCode::Jmp) && i.a() == a && i.sbx() > 0)
            .count()
    }

    #[test]
    fn break_from_if_block_closes_captured_local() {
        let p = compile_ok(
            "for i = 1, 2 do if i then local y = i; g = function() return y end; break end end",
        );
        // (for index), (for limit), (for step) sit below `i` in register 3
        assert_eq!(closing_exits(&p, 4), 1);
    }

    #[test]
    fn break_from_do_block_closes_captured_local() {
        let p = compile_ok("while true do do local y = 1; g = function() return y end; break end end");
        assert_eq!(closing_exits(&p, 1), 1);
    }

    #[test]
    fn table_constructor_flushes_every_fifty() {
        let items: Vec<String> = (1..=60).map(|i| i.to_string()).collect();
        let p = compile_ok(&format!("local t = {{{}}}", items.join(",")));
        let lists: Vec<Instruction> = p
            .code
            .iter()
            .copied()
            .filter(|i| i.opcode() == Some(OpCode::SetList))
            .collect();
        assert_eq!(lists.len(), 2);
        assert_eq!((lists[0].b(), lists[0].c()), (50, 1));
        assert_eq!((lists[1].b(), lists[1].c()), (10, 2));
    }

    #[test]
    fn trailing_vararg_in_constructor_is_open() {
        let p = compile_ok("local t = {1, ...}");
        let setlist = p.code.iter().find(|i| i.opcode() == Some(OpCode::SetList)).unwrap();
        assert_eq!(setlist.b(), 0);
    }

    #[test]
    fn nested_closure_captures_local() {
        let p = compile_ok("local x = 0; local function inc() x = x + 1; return x end");
        let inner = &p.protos[0];
        assert_eq!(inner.upvalues, vec![UpvalueDesc::Stack(0)]);
        assert_eq!(inner.upvalue_names, vec!["x"]);
        assert!(opcodes(inner).contains(&OpCode::SetUpval));
    }

    #[test]
    fn global_in_nested_function_threads_env() {
        let p = compile_ok("local function f() return function() return g end end");
        let inner = &p.protos[0].protos[0];
        assert_eq!(inner.upvalues, vec![UpvalueDesc::Upvalue(0)]);
        assert_eq!(p.protos[0].upvalues, vec![UpvalueDesc::Upvalue(0)]);
    }

    #[test]
    fn single_call_return_is_tail_call() {
        let p = compile_ok("return f()");
        assert_eq!(
            opcodes(&p),
            vec![OpCode::GetTabUp, OpCode::TailCall, OpCode::Return, OpCode::Return]
        );
        assert_eq!(p.code[2].b(), 0);
    }

    #[test]
    fn method_call_uses_self() {
        let p = compile_ok("obj:m(1)");
        assert!(opcodes(&p).contains(&OpCode::Self_));
        let call = p.code.iter().find(|i| i.opcode() == Some(OpCode::Call)).unwrap();
        assert_eq!(call.b(), 3);
    }

    #[test]
    fn line_info_covers_every_instruction() {
        let p = compile_ok("local a = 1\nlocal b = 2\n");
        assert_eq!(p.line_info.len(), p.code.len());
        assert_eq!(&p.line_info[..2], &[1, 2]);
    }

    #[test]
    fn goto_and_labels_are_rejected() {
        assert!(matches!(compile_err("goto done"), LuaError::Compile(_)));
        assert!(matches!(compile_err("::done::"), LuaError::Compile(_)));
    }

    #[test]
    fn vararg_outside_vararg_function_is_rejected() {
        assert!(matches!(
            compile_err("local function f() return ... end"),
            LuaError::Compile(_)
        ));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        assert!(matches!(compile_err("break"), LuaError::Compile(_)));
    }

    #[test]
    fn syntax_errors_pass_through() {
        assert!(matches!(compile_err("local = 1"), LuaError::Syntax { .. }));
    }
}
