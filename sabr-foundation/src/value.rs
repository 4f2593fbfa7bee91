//! The 64-bit cell all of sabr computes with.

use std::fmt;

/// A single stack cell. There is no runtime type tag; the bits are
/// reinterpreted as whichever view the operation asks for, and it is up to
/// the program to use one view per variable consistently.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Self = Self(0);

    pub fn from_i64(i: i64) -> Self {
        Self(i as u64)
    }

    pub fn from_u64(u: u64) -> Self {
        Self(u)
    }

    pub fn from_f64(f: f64) -> Self {
        Self(f.to_bits())
    }

    /// Truth as produced by comparison operators and consumed by `if`.
    pub fn from_bool(b: bool) -> Self {
        Self(b as u64)
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn as_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:#x})", self.0)
    }
}

/// Parses a numeric literal: `0x`/`0o`/`0b` integers, decimal integers, and
/// decimal floats (anything containing a `.`). A single `+`/`-` prefix is
/// honored before base dispatch. Signed parses that overflow retry as
/// unsigned, so `0xFFFFFFFFFFFFFFFF` keeps its bits.
pub fn parse_number(text: &str) -> Option<Value> {
    let (negate, unsigned) = match text.as_bytes().first()? {
        b'+' => (false, &text[1..]),
        b'-' => (true, &text[1..]),
        _ => (false, text),
    };

    let based = unsigned.strip_prefix("0x").map(|digits| (digits, 16)).or_else(|| {
        unsigned
            .strip_prefix("0o")
            .map(|digits| (digits, 8))
            .or_else(|| unsigned.strip_prefix("0b").map(|digits| (digits, 2)))
    });

    let magnitude = if let Some((digits, base)) = based {
        parse_int(digits, base)?
    } else if text.contains('.') {
        // The sign is part of the literal here, like everywhere floats are
        // parsed at once.
        return text.parse::<f64>().ok().map(Value::from_f64);
    } else {
        return parse_int(text, 10);
    };

    Some(if negate {
        Value::from_i64(magnitude.as_i64().wrapping_neg())
    } else {
        magnitude
    })
}

fn parse_int(digits: &str, base: u32) -> Option<Value> {
    use std::num::IntErrorKind;

    match i64::from_str_radix(digits, base) {
        Ok(i) => Some(Value::from_i64(i)),
        Err(error) if *error.kind() == IntErrorKind::PosOverflow => {
            u64::from_str_radix(digits, base).ok().map(Value::from_u64)
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Value;

    #[test]
    fn views_share_bits() {
        let v = Value::from_i64(-1);
        assert_eq!(v.as_u64(), u64::MAX);
        assert_eq!(v.as_i64(), -1);

        let f = Value::from_f64(2.5);
        assert_eq!(f.as_f64(), 2.5);
        assert_eq!(Value::from_bytes(f.as_bytes()), f);
    }

    #[test]
    fn all_bases_agree() {
        for literal in ["0x2A", "0o52", "0b101010", "42", "+42"] {
            assert_eq!(super::parse_number(literal), Some(Value::from_i64(42)));
        }
    }

    #[test]
    fn negative_and_overflowing_literals() {
        assert_eq!(super::parse_number("-1"), Some(Value::from_u64(u64::MAX)));
        assert_eq!(super::parse_number("-0x10"), Some(Value::from_i64(-16)));
        assert_eq!(
            super::parse_number("0xFFFFFFFFFFFFFFFF"),
            Some(Value::from_u64(u64::MAX))
        );
        assert_eq!(
            super::parse_number("18446744073709551615"),
            Some(Value::from_u64(u64::MAX))
        );
    }

    #[test]
    fn floats_need_a_dot() {
        assert_eq!(super::parse_number("2.5"), Some(Value::from_f64(2.5)));
        assert_eq!(super::parse_number("-0.25"), Some(Value::from_f64(-0.25)));
        assert_eq!(super::parse_number("1e5"), None);
        for garbage in ["", "-", ".", "0x", "12x", "0b102"] {
            assert_eq!(super::parse_number(garbage), None, "{garbage:?}");
        }
    }
}
