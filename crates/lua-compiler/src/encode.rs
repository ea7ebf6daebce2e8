//! Binary encoder: `Prototype` → Lua 5.3 chunk bytes.

use lua_core::{Constant, Prototype};

use crate::chunk::*;

// ── Low-level write helpers ────────────────────────────────────────────────

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn push_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn push_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_len(&mut self, n: usize) {
        self.push_u32(n as u32);
    }

    fn push_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// `0` for the empty string, `len + 1` for short strings, else `0xFF`
    /// followed by `len + 1` as a size_t.
    fn push_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if bytes.is_empty() {
            self.push_u8(0);
            return;
        }
        let size = bytes.len() + 1;
        if bytes.len() <= MAX_SHORT_STR_LEN {
            self.push_u8(size as u8);
        } else {
            self.push_u8(0xFF);
            self.buf.extend_from_slice(&(size as u64).to_le_bytes());
        }
        self.buf.extend_from_slice(bytes);
    }

    fn header(&mut self) {
        self.buf.extend_from_slice(LUA_SIGNATURE);
        self.push_u8(LUAC_VERSION);
        self.push_u8(LUAC_FORMAT);
        self.buf.extend_from_slice(LUAC_DATA);
        self.push_u8(CINT_SIZE);
        self.push_u8(CSIZET_SIZE);
        self.push_u8(INSTRUCTION_SIZE);
        self.push_u8(LUA_INTEGER_SIZE);
        self.push_u8(LUA_NUMBER_SIZE);
        self.push_i64(LUAC_INT);
        self.push_f64(LUAC_NUM);
    }

    // ── Proto encoder ──────────────────────────────────────────────────────

    /// Nested prototypes whose source matches the parent's store it empty.
    fn proto(&mut self, proto: &Prototype, parent_source: Option<&str>) {
        match parent_source {
            Some(parent) if parent == proto.source || proto.source.is_empty() => self.push_u8(0),
            _ => self.push_str(&proto.source),
        }
        self.push_u32(proto.line_defined);
        self.push_u32(proto.last_line_defined);
        self.push_u8(proto.num_params);
        self.push_u8(proto.is_vararg as u8);
        self.push_u8(proto.max_stack_size);

        self.push_len(proto.code.len());
        for inst in &proto.code {
            self.push_u32(inst.0);
        }

        self.push_len(proto.constants.len());
        for k in &proto.constants {
            self.constant(k);
        }

        self.push_len(proto.upvalues.len());
        for uv in &proto.upvalues {
            let (instack, idx) = uv.to_wire();
            self.push_u8(instack);
            self.push_u8(idx);
        }

        self.push_len(proto.protos.len());
        let source = match parent_source {
            Some(parent) if proto.source.is_empty() => parent,
            _ => proto.source.as_str(),
        };
        for p in &proto.protos {
            self.proto(p, Some(source));
        }

        self.push_len(proto.line_info.len());
        for &line in &proto.line_info {
            self.push_u32(line);
        }

        self.push_len(proto.loc_vars.len());
        for v in &proto.loc_vars {
            self.push_str(&v.name);
            self.push_u32(v.start_pc);
            self.push_u32(v.end_pc);
        }

        self.push_len(proto.upvalue_names.len());
        for name in &proto.upvalue_names {
            self.push_str(name);
        }
    }

    fn constant(&mut self, k: &Constant) {
        match k {
            Constant::Nil => self.push_u8(TAG_NIL),
            Constant::Boolean(b) => {
                self.push_u8(TAG_BOOLEAN);
                self.push_u8(*b as u8);
            }
            Constant::Integer(n) => {
                self.push_u8(TAG_INTEGER);
                self.push_i64(*n);
            }
            Constant::Float(f) => {
                self.push_u8(TAG_NUMBER);
                self.push_f64(*f);
            }
            Constant::String(s) => {
                let tag = if s.len() <= MAX_SHORT_STR_LEN {
                    TAG_SHORT_STR
                } else {
                    TAG_LONG_STR
                };
                self.push_u8(tag);
                self.push_str(s);
            }
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encode a main function as a binary chunk suitable for writing to a `.luac` file.
pub fn dump(proto: &Prototype) -> Vec<u8> {
    let mut w = Writer { buf: Vec::new() };
    w.header();
    w.push_u8(proto.upvalues.len() as u8);
    w.proto(proto, None);
    w.buf
}
