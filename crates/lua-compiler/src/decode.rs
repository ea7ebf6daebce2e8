//! Binary decoder: Lua 5.3 chunk bytes → `Prototype`.
//!
//! Mirrors the encoding in `encode.rs` exactly. Every read is bounds-checked,
//! so truncated input is reported as [`LuaError::ChunkFormat`].

use std::rc::Rc;

use lua_core::{Constant, Instruction, LocVar, LuaError, Prototype, UpvalueDesc};

use crate::chunk::*;

fn corrupted(what: impl Into<String>) -> LuaError {
    LuaError::ChunkFormat(what.into())
}

// ── Cursor reader ─────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], LuaError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                corrupted(format!("truncated: need {n} bytes at offset {}", self.pos))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], LuaError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, LuaError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, LuaError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, LuaError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_lua_integer(&mut self) -> Result<i64, LuaError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_lua_number(&mut self) -> Result<f64, LuaError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Element count of a vector; each element takes at least `min_size`
    /// bytes, so counts the remaining input cannot hold are rejected early.
    fn read_len(&mut self, min_size: usize) -> Result<usize, LuaError> {
        let n = self.read_u32()? as usize;
        if n.saturating_mul(min_size) > self.data.len() - self.pos {
            return Err(corrupted(format!("truncated: {n} elements at offset {}", self.pos)));
        }
        Ok(n)
    }

    fn read_string(&mut self) -> Result<String, LuaError> {
        let mut size = self.read_u8()? as u64;
        if size == 0 {
            return Ok(String::new());
        }
        if size == 0xFF {
            size = self.read_u64()?;
        }
        let len = usize::try_from(size - 1).map_err(|_| corrupted("string too long"))?;
        let at = self.pos;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| corrupted(format!("string at offset {at} is not valid UTF-8")))
    }

    fn check_header(&mut self) -> Result<(), LuaError> {
        if self.read_bytes(4)? != LUA_SIGNATURE {
            return Err(corrupted("not a precompiled chunk"));
        }
        if self.read_u8()? != LUAC_VERSION {
            return Err(corrupted("version mismatch"));
        }
        if self.read_u8()? != LUAC_FORMAT {
            return Err(corrupted("format mismatch"));
        }
        if self.read_bytes(6)? != LUAC_DATA {
            return Err(corrupted("corrupted"));
        }
        let sizes = [
            (CINT_SIZE, "int"),
            (CSIZET_SIZE, "size_t"),
            (INSTRUCTION_SIZE, "instruction"),
            (LUA_INTEGER_SIZE, "lua_Integer"),
            (LUA_NUMBER_SIZE, "lua_Number"),
        ];
        for (expected, what) in sizes {
            if self.read_u8()? != expected {
                return Err(corrupted(format!("{what} size mismatch")));
            }
        }
        if self.read_lua_integer()? != LUAC_INT {
            return Err(corrupted("endianness mismatch"));
        }
        if self.read_lua_number()? != LUAC_NUM {
            return Err(corrupted("float format mismatch"));
        }
        Ok(())
    }

    // ── Proto decoder ─────────────────────────────────────────────────────────

    fn read_proto(&mut self, parent_source: &str) -> Result<Prototype, LuaError> {
        let mut source = self.read_string()?;
        if source.is_empty() {
            source = parent_source.to_string();
        }
        let line_defined = self.read_u32()?;
        let last_line_defined = self.read_u32()?;
        let num_params = self.read_u8()?;
        let is_vararg = self.read_u8()? != 0;
        let max_stack_size = self.read_u8()?;

        let n = self.read_len(4)?;
        let mut code = Vec::with_capacity(n);
        for _ in 0..n {
            let inst = Instruction(self.read_u32()?);
            if inst.opcode().is_none() {
                return Err(corrupted(format!("invalid opcode {}", inst.0 & 0x3F)));
            }
            code.push(inst);
        }

        let n = self.read_len(1)?;
        let mut constants = Vec::with_capacity(n);
        for _ in 0..n {
            constants.push(self.read_constant()?);
        }

        let n = self.read_len(2)?;
        let mut upvalues = Vec::with_capacity(n);
        for _ in 0..n {
            let instack = self.read_u8()?;
            let idx = self.read_u8()?;
            upvalues.push(UpvalueDesc::from_wire(instack, idx));
        }

        let n = self.read_len(1)?;
        let mut protos = Vec::with_capacity(n);
        for _ in 0..n {
            protos.push(Rc::new(self.read_proto(&source)?));
        }

        let n = self.read_len(4)?;
        let mut line_info = Vec::with_capacity(n);
        for _ in 0..n {
            line_info.push(self.read_u32()?);
        }

        let n = self.read_len(9)?;
        let mut loc_vars = Vec::with_capacity(n);
        for _ in 0..n {
            loc_vars.push(LocVar {
                name: self.read_string()?,
                start_pc: self.read_u32()?,
                end_pc: self.read_u32()?,
            });
        }

        let n = self.read_len(1)?;
        let mut upvalue_names = Vec::with_capacity(n);
        for _ in 0..n {
            upvalue_names.push(self.read_string()?);
        }

        Ok(Prototype {
            source,
            line_defined,
            last_line_defined,
            num_params,
            is_vararg,
            max_stack_size,
            code,
            constants,
            upvalues,
            protos,
            line_info,
            loc_vars,
            upvalue_names,
        })
    }

    fn read_constant(&mut self) -> Result<Constant, LuaError> {
        match self.read_u8()? {
            TAG_NIL => Ok(Constant::Nil),
            TAG_BOOLEAN => Ok(Constant::Boolean(self.read_u8()? != 0)),
            TAG_INTEGER => Ok(Constant::Integer(self.read_lua_integer()?)),
            TAG_NUMBER => Ok(Constant::Float(self.read_lua_number()?)),
            TAG_SHORT_STR | TAG_LONG_STR => Ok(Constant::String(self.read_string()?)),
            tag => Err(corrupted(format!("unknown constant tag 0x{tag:02x}"))),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decode a binary chunk back into its main function.
pub fn undump(bytes: &[u8]) -> Result<Prototype, LuaError> {
    let mut r = Reader::new(bytes);
    r.check_header()?;
    let _size_upvalues = r.read_u8()?;
    r.read_proto("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::dump;
    use lua_core::OpCode;

    fn sample() -> Prototype {
        let child = Prototype {
            source: "@sample.lua".into(),
            line_defined: 3,
            last_line_defined: 5,
            num_params: 2,
            is_vararg: true,
            max_stack_size: 4,
            code: vec![
                Instruction::abc(OpCode::GetUpval, 2, 0, 0),
                Instruction::abc(OpCode::Return, 2, 2, 0),
            ],
            constants: vec![],
            upvalues: vec![UpvalueDesc::Upvalue(0)],
            protos: vec![],
            line_info: vec![4, 5],
            loc_vars: vec![LocVar {
                name: "a".into(),
                start_pc: 0,
                end_pc: 2,
            }],
            upvalue_names: vec!["x".into()],
        };
        Prototype {
            source: "@sample.lua".into(),
            line_defined: 0,
            last_line_defined: 0,
            num_params: 0,
            is_vararg: true,
            max_stack_size: 2,
            code: vec![
                Instruction::abx(OpCode::LoadK, 0, 3),
                Instruction::abx(OpCode::Closure, 1, 0),
                Instruction::asbx(OpCode::Jmp, 0, -2),
                Instruction::abc(OpCode::Return, 0, 1, 0),
            ],
            constants: vec![
                Constant::Nil,
                Constant::Boolean(true),
                Constant::Integer(-42),
                Constant::Float(2.5),
                Constant::String("short".into()),
                Constant::String("L".repeat(400)),
                Constant::String(String::new()),
            ],
            upvalues: vec![UpvalueDesc::Stack(0)],
            protos: vec![Rc::new(child)],
            line_info: vec![1, 2, 2, 6],
            loc_vars: vec![],
            upvalue_names: vec!["_ENV".into()],
        }
    }

    #[test]
    fn round_trip_is_structurally_identical() {
        let proto = sample();
        let bytes = dump(&proto);
        assert!(is_binary_chunk(&bytes));
        assert_eq!(undump(&bytes).unwrap(), proto);
    }

    #[test]
    fn nested_source_is_inherited() {
        let bytes = dump(&sample());
        let decoded = undump(&bytes).unwrap();
        assert_eq!(decoded.protos[0].source, "@sample.lua");
    }

    #[test]
    fn compiled_chunk_round_trips() {
        let proto = crate::compile(
            "local x = 0 local function inc() x = x + 1 return x end return inc(), 'done'",
            "=round",
        )
        .unwrap();
        assert_eq!(undump(&dump(&proto)).unwrap(), proto);
    }

    #[test]
    fn every_truncation_is_a_chunk_error() {
        let bytes = dump(&sample());
        for len in 0..bytes.len() {
            match undump(&bytes[..len]) {
                Err(LuaError::ChunkFormat(_)) => {}
                other => panic!("length {len}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn header_mismatches_are_rejected() {
        let good = dump(&sample());
        for (offset, what) in [(0, "signature"), (4, "version"), (12, "int size"), (17, "LUAC_INT")] {
            let mut bad = good.clone();
            bad[offset] ^= 0xFF;
            assert!(
                matches!(undump(&bad), Err(LuaError::ChunkFormat(_))),
                "{what} corruption accepted"
            );
        }
    }

    #[test]
    fn unknown_constant_tag_is_rejected() {
        let proto = Prototype {
            constants: vec![Constant::Nil],
            ..Default::default()
        };
        let mut bytes = dump(&proto);
        // header(33) + upvalue count(1) + source(1) + lines(8) + 3 bytes + code len(4) + consts len(4)
        let tag_at = 33 + 1 + 1 + 8 + 3 + 4 + 4;
        assert_eq!(bytes[tag_at], TAG_NIL);
        bytes[tag_at] = 0x42;
        assert!(matches!(undump(&bytes), Err(LuaError::ChunkFormat(_))));
    }

    #[test]
    fn non_utf8_string_constant_is_rejected() {
        let proto = Prototype {
            constants: vec![Constant::String("AB".into())],
            ..Default::default()
        };
        let mut bytes = dump(&proto);
        let at = bytes.windows(2).position(|w| w == b"AB").unwrap();
        bytes[at] = 0xFF;
        match undump(&bytes) {
            Err(LuaError::ChunkFormat(msg)) => assert!(msg.contains("UTF-8"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
