//! Numeric semantics shared by the compiler and the VM: floor division and
//! modulo, logical shifts, float/integer conversion, string→number parsing,
//! `%.14g` float formatting and the "floating point byte" size encoding used
//! by `NEWTABLE`.

// ── Integer / float arithmetic ────────────────────────────────────────────────

/// Integer floor division. `b` must be non-zero; the VM reports `n//0` itself.
pub fn ifloor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if (a > 0 && b > 0) || (a < 0 && b < 0) || a.wrapping_rem(b) == 0 {
        q
    } else {
        q - 1
    }
}

pub fn ffloor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

/// Integer modulo with the sign of the divisor. `b` must be non-zero.
pub fn imod(a: i64, b: i64) -> i64 {
    a.wrapping_sub(ifloor_div(a, b).wrapping_mul(b))
}

/// Float modulo with the sign of the divisor.
///
/// `fmod(5, inf) == 5` and `fmod(-5, inf) == inf`: a finite dividend keeps
/// its value when the signs agree and collapses to the divisor otherwise.
pub fn fmod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && (m > 0.0) != (b > 0.0) {
        m + b
    } else {
        m
    }
}

/// Logical shift left; a negative amount shifts right.
pub fn shift_left(a: i64, n: i64) -> i64 {
    if n >= 64 || n <= -64 {
        0
    } else if n >= 0 {
        ((a as u64) << n) as i64
    } else {
        ((a as u64) >> -n) as i64
    }
}

/// Logical shift right; a negative amount shifts left.
pub fn shift_right(a: i64, n: i64) -> i64 {
    if n <= -64 {
        0
    } else {
        shift_left(a, -n)
    }
}

/// Converts a float to an integer only when the value is integral and fits.
pub fn float_to_integer(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it does not fit.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.floor() == f && f >= -LIMIT && f < LIMIT {
        Some(f as i64)
    } else {
        None
    }
}

// ── String → number ───────────────────────────────────────────────────────────

/// Parses a Lua integer numeral (decimal or hex, surrounding whitespace
/// allowed). Hex numerals wrap around on overflow; decimal ones that overflow
/// are rejected so the caller can retry them as floats.
pub fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    let (neg, body) = split_sign(s);
    if let Some(hex) = strip_hex_prefix(body) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let mut n: i64 = 0;
        for b in hex.bytes() {
            n = n.wrapping_mul(16).wrapping_add(hex_digit(b) as i64);
        }
        return Some(if neg { n.wrapping_neg() } else { n });
    }
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude: i128 = body.parse().ok()?;
    let value = if neg { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}

/// Parses a Lua float numeral: decimal with optional fraction/exponent or a
/// hex mantissa with an optional binary `p` exponent. `inf`/`nan` spellings
/// are not numerals.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    let (neg, body) = split_sign(s);
    let magnitude = match strip_hex_prefix(body) {
        Some(hex) => parse_hex_float(hex)?,
        None => {
            let ok = !body.is_empty()
                && body
                    .bytes()
                    .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
                && body.bytes().any(|b| b.is_ascii_digit());
            if !ok {
                return None;
            }
            body.parse::<f64>().ok()?
        }
    };
    Some(if neg { -magnitude } else { magnitude })
}

/// A string converted the way arithmetic coerces it: integer numerals stay
/// integers, everything else numeric becomes a float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeral {
    Integer(i64),
    Float(f64),
}

pub fn str_to_number(s: &str) -> Option<Numeral> {
    parse_integer(s)
        .map(Numeral::Integer)
        .or_else(|| parse_float(s).map(Numeral::Float))
}

fn split_sign(s: &str) -> (bool, &str) {
    match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn hex_digit(b: u8) -> u32 {
    (b as char).to_digit(16).unwrap_or(0)
}

fn parse_hex_float(s: &str) -> Option<f64> {
    let (mantissa, exp) = match s.find(['p', 'P']) {
        Some(i) => (&s[..i], s[i + 1..].parse::<i32>().ok()?),
        None => (s, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value = 0.0f64;
    for b in int_part.bytes() {
        if !b.is_ascii_hexdigit() {
            return None;
        }
        value = value * 16.0 + hex_digit(b) as f64;
    }
    let mut scale = 1.0 / 16.0;
    for b in frac_part.bytes() {
        if !b.is_ascii_hexdigit() {
            return None;
        }
        value += hex_digit(b) as f64 * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exp))
}

// ── Formatting ────────────────────────────────────────────────────────────────

/// Formats a float like C's `%.14g`, appending `.0` when the result would
/// otherwise read as an integer.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sci = format!("{f:.13e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let text = if !(-4..14).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let precision = (13 - exp) as usize;
        trim_fraction(&format!("{f:.precision$}")).to_string()
    };
    if text.bytes().all(|b| b == b'-' || b.is_ascii_digit()) {
        text + ".0"
    } else {
        text
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

// ── Floating point byte ───────────────────────────────────────────────────────

/// Encodes a table size hint as `eeeeexxx`: `(1xxx) * 2^(eeeee - 1)` when
/// `eeeee != 0`, else `xxx`. Rounds up.
pub fn int_to_fb(mut x: usize) -> u32 {
    let mut e = 0u32;
    if x < 8 {
        return x as u32;
    }
    while x >= (8 << 4) {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= (8 << 1) {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x as u32 - 8)
}

pub fn fb_to_int(x: u32) -> usize {
    if x < 8 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << ((x >> 3) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(ifloor_div(-7, 2), -4);
        assert_eq!(ifloor_div(7, -2), -4);
        assert_eq!(ifloor_div(7, 2), 3);
        assert_eq!(ifloor_div(-8, 2), -4);
        assert_eq!(ffloor_div(-7.0, 2.0), -4.0);
        assert_eq!(ifloor_div(i64::MIN, -1), i64::MIN);
    }

    #[test]
    fn modulo_takes_sign_of_divisor() {
        assert_eq!(imod(-7, 2), 1);
        assert_eq!(imod(7, -2), -1);
        assert_eq!(imod(7, 3), 1);
        assert_eq!(fmod(-7.0, 2.0), 1.0);
        assert_eq!(fmod(5.5, 2.0), 1.5);
    }

    #[test]
    fn fmod_infinite_divisor() {
        assert_eq!(fmod(5.0, f64::INFINITY), 5.0);
        assert_eq!(fmod(-5.0, f64::NEG_INFINITY), -5.0);
        assert_eq!(fmod(-5.0, f64::INFINITY), f64::INFINITY);
        assert_eq!(fmod(5.0, f64::NEG_INFINITY), f64::NEG_INFINITY);
    }

    #[test]
    fn shifts_are_logical_and_reversible() {
        assert_eq!(shift_left(1, 4), 16);
        assert_eq!(shift_left(1, 64), 0);
        assert_eq!(shift_right(-1, 60), 0xF);
        assert_eq!(shift_left(16, -4), 1);
        assert_eq!(shift_right(1, -4), 16);
        assert_eq!(shift_right(1, i64::MIN), 0);
    }

    #[test]
    fn float_to_integer_only_when_exact() {
        assert_eq!(float_to_integer(3.0), Some(3));
        assert_eq!(float_to_integer(-0.0), Some(0));
        assert_eq!(float_to_integer(3.5), None);
        assert_eq!(float_to_integer(f64::NAN), None);
        assert_eq!(float_to_integer(9.3e18), None);
    }

    #[test]
    fn parses_numerals() {
        assert_eq!(parse_integer(" 42 "), Some(42));
        assert_eq!(parse_integer("-0x10"), Some(-16));
        assert_eq!(parse_integer("0xffffffffffffffff"), Some(-1));
        assert_eq!(parse_integer("9223372036854775808"), None);
        assert_eq!(parse_integer("1.5"), None);
        assert_eq!(parse_float("1.5e2"), Some(150.0));
        assert_eq!(parse_float("0x1p4"), Some(16.0));
        assert_eq!(parse_float(".5"), Some(0.5));
        assert_eq!(parse_float("inf"), None);
        assert_eq!(parse_float("nan"), None);
        assert_eq!(parse_float("abc"), None);
        assert_eq!(str_to_number("10"), Some(Numeral::Integer(10)));
        assert_eq!(str_to_number("10.0"), Some(Numeral::Float(10.0)));
    }

    #[test]
    fn formats_like_percent_14g() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(3.14), "3.14");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(1e100), "1e+100");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(2f64.powi(53)), "9.007199254741e+15");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn floating_point_byte_examples() {
        assert_eq!(int_to_fb(0), 0);
        assert_eq!(int_to_fb(7), 7);
        assert_eq!(fb_to_int(int_to_fb(8)), 8);
        assert_eq!(fb_to_int(int_to_fb(100)), 104);
    }

    proptest! {
        #[test]
        fn floor_div_and_mod_reconstruct_dividend(a in -10_000i64..10_000, b in prop_oneof![-500i64..-1, 1i64..500]) {
            let q = ifloor_div(a, b);
            let r = imod(a, b);
            prop_assert_eq!(q * b + r, a);
            prop_assert!(r == 0 || (r > 0) == (b > 0));
            prop_assert!(r.abs() < b.abs());
        }

        #[test]
        fn fb_encoding_never_shrinks(n in 0usize..1_000_000) {
            prop_assert!(fb_to_int(int_to_fb(n)) >= n);
        }
    }
}
