//! Escape handling for string literals.
//!
//! Malformed `\u` and `\x` sequences are kept verbatim instead of producing an
//! error.

/// Decode escape sequences in the raw contents of a string literal.
pub fn unescape(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());

    let mut idx = 0;
    while idx < chars.len() {
        let c = chars[idx];
        if c != '\\' {
            out.push(c);
            idx += 1;
            continue;
        }

        let next = match chars.get(idx + 1) {
            Some(next) => *next,
            None => {
                // Trailing backslash.
                out.push('\\');
                break;
            }
        };

        match next {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'e' => out.push('\u{1b}'),
            '0' => out.push('\0'),
            'u' => match decode_hex(&chars, idx + 2, 4) {
                Some(c) => {
                    out.push(c);
                    idx += 6;
                    continue;
                }
                None => {
                    out.push_str("\\u");
                }
            },
            'x' => match decode_hex(&chars, idx + 2, 2) {
                Some(c) => {
                    out.push(c);
                    idx += 4;
                    continue;
                }
                None => {
                    out.push_str("\\x");
                }
            },
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        idx += 2;
    }

    out
}

fn decode_hex(chars: &[char], start: usize, len: usize) -> Option<char> {
    if start + len > chars.len() {
        return None;
    }
    let digits: String = chars[start..start + len].iter().collect();
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let code = u32::from_str_radix(&digits, 16).ok()?;
    char::from_u32(code)
}

/// Encode a string so that it can be placed inside a quoted literal.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\u{1b}' => out.push_str("\\e"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unescape_sequences() {
        // (input, expected)
        let tests = [
            (r"plain", "plain"),
            (r"a\\b", "a\\b"),
            (r"it\'s", "it's"),
            (r#"say \"hi\""#, "say \"hi\""),
            (r"line\nbreak", "line\nbreak"),
            (r"\r\t\b\f\e\0", "\r\t\u{08}\u{0c}\u{1b}\0"),
            (r"\u0041\u00e9", "Aé"),
            (r"\x41\x7a", "Az"),
        ];

        for (input, expected) in tests {
            assert_eq!(expected, unescape(input), "input: {input}");
        }
    }

    #[test]
    fn malformed_escapes_kept_verbatim() {
        // (input, expected)
        let tests = [
            (r"\u12", r"\u12"),
            (r"\uZZZZ", r"\uZZZZ"),
            (r"\xG1", r"\xG1"),
            (r"\x4", r"\x4"),
            (r"\q", r"\q"),
            ("trailing\\", "trailing\\"),
            // Surrogates are not valid chars.
            (r"\uD800", r"\uD800"),
        ];

        for (input, expected) in tests {
            assert_eq!(expected, unescape(input), "input: {input}");
        }
    }

    #[test]
    fn escape_unescape_printable() {
        let inputs = [
            "",
            "hello world",
            r"back\slash",
            "quote's \"double\"",
            r"\u0041 not an escape once escaped",
            "unicode ✓ ünïcödé",
            r"\\\\",
        ];

        for input in inputs {
            assert_eq!(input, unescape(&escape(input)), "input: {input}");
        }
    }

    #[test]
    fn escape_unescape_control() {
        let input = "tab\tnewline\nreturn\r";
        assert_eq!(input, unescape(&escape(input)));
    }
}
