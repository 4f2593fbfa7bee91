//! String-literal decoding and identifier admissibility.

use sabr_foundation::value::Value;

/// Why a string body failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    InvalidEscape,
    /// A bare `'` or `"` inside a string; both must be escaped.
    BareQuote,
}

/// Decodes the body of a `'…'` or `"…"` literal (quotes included) into one
/// [`Value`] per code point.
///
/// Escapes follow the usual C repertoire: `\a \b \e \f \n \r \t \v \\ \'
/// \"`, one to three octal digits, `\xHH`, `\uHHHH`, and `\UHHHHHHHH`.
pub fn decode_string(text: &str) -> Result<Vec<Value>, StringError> {
    let body = &text[1..text.len() - 1];
    let mut values = vec![];
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        let code_point = match c {
            '\\' => decode_escape(&mut chars)?,
            '\'' | '"' => return Err(StringError::BareQuote),
            _ => c as u64,
        };
        values.push(Value::from_u64(code_point));
    }
    Ok(values)
}

fn decode_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<u64, StringError> {
    let c = chars.next().ok_or(StringError::InvalidEscape)?;
    Ok(match c {
        'a' => 0x07,
        'b' => 0x08,
        'e' => 0x1B,
        'f' => 0x0C,
        'n' => b'\n' as u64,
        'r' => b'\r' as u64,
        't' => b'\t' as u64,
        'v' => 0x0B,
        '\\' => b'\\' as u64,
        '\'' => b'\'' as u64,
        '"' => b'"' as u64,
        '0'..='7' => {
            // One to three octal digits, the first already consumed.
            let mut value = c as u64 - '0' as u64;
            for _ in 0..2 {
                match chars.peek() {
                    Some(&d @ '0'..='7') => {
                        chars.next();
                        value = value * 8 + (d as u64 - '0' as u64);
                    }
                    _ => break,
                }
            }
            value
        }
        'x' => hex_escape(chars, 2)?,
        'u' => hex_escape(chars, 4)?,
        'U' => hex_escape(chars, 8)?,
        _ => return Err(StringError::InvalidEscape),
    })
}

/// Exactly `length` hex digits; fewer is an error.
fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    length: usize,
) -> Result<u64, StringError> {
    let mut value = 0u64;
    for _ in 0..length {
        let digit = chars
            .peek()
            .and_then(|c| c.to_digit(16))
            .ok_or(StringError::InvalidEscape)?;
        chars.next();
        value = value * 16 + digit as u64;
    }
    Ok(value)
}

/// Whether `name` may be interned as a user identifier: non-empty, not
/// starting with a reserved character or a digit, and a `+`/`-`/`.` prefix
/// only if no digit follows.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    match first {
        '+' | '-' | '.' => !matches!(chars.next(), Some('0'..='9')),
        '0'..='9' => false,
        '@' | '(' | ')' | '{' | '}' | '#' | '$' | '\\' | '\'' | '"' => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(text: &str) -> Vec<u64> {
        decode_string(text)
            .unwrap()
            .into_iter()
            .map(|v| v.as_u64())
            .collect()
    }

    #[test]
    fn plain_text_decodes_to_code_points() {
        assert_eq!(decoded("'ab'"), [0x61, 0x62]);
        assert_eq!(decoded("'가'"), [0xAC00]);
    }

    #[test]
    fn every_escape_shape() {
        assert_eq!(decoded(r"'\n\t\\'"), [10, 9, 0x5C]);
        assert_eq!(decoded(r"'\e'"), [0x1B]);
        assert_eq!(decoded(r"'\101'"), [0o101]);
        assert_eq!(decoded(r"'\0'"), [0]);
        assert_eq!(decoded(r"'\x41'"), [0x41]);
        assert_eq!(decoded(r"'\uAC00'"), [0xAC00]);
        assert_eq!(decoded(r"'\U0001F600'"), [0x1F600]);
        assert_eq!(decoded(r#"'\''"#), [0x27]);
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert_eq!(decode_string(r"'\q'"), Err(StringError::InvalidEscape));
        assert_eq!(decode_string(r"'\xG1'"), Err(StringError::InvalidEscape));
        assert_eq!(decode_string(r"'\u12'"), Err(StringError::InvalidEscape));
        assert_eq!(decode_string(r#"'say "hi"'"#), Err(StringError::BareQuote));
    }

    #[test]
    fn identifier_admissibility() {
        for name in ["foo", "x1", "-x", "+x", ".dot", "가나다", "a+b"] {
            assert!(is_valid_identifier(name), "{name} should be valid");
        }
        for name in ["", "1x", "-1x", "@a", "#a", "$a", "'a", "{a", "\\a"] {
            assert!(!is_valid_identifier(name), "{name} should be invalid");
        }
    }
}
