//! Utility functions for the compiler module.

/// Format a float as a GLSL literal.
///
/// GLSL ES does not promote integer literals to float, so the result always carries a
/// decimal point (`60` -> `60.0`). Non-finite values collapse to `0.0`.
pub fn fmt_float(v: f64) -> String {
    if !v.is_finite() {
        return "0.0".to_string();
    }
    let s = format!("{v}");
    if s.contains('.') { s } else { format!("{s}.0") }
}

pub fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Whether `s` is a valid GLSL identifier (ASCII, not starting with a digit,
/// not using the reserved `gl_` prefix).
pub fn is_glsl_ident(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(is_ident_char) && !s.starts_with("gl_")
}

/// Whether `haystack` mentions `ident` as a whole identifier.
pub fn contains_ident(haystack: &str, ident: &str) -> bool {
    if ident.is_empty() {
        return false;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(ident) {
        let start = from + offset;
        let end = start + ident.len();
        let before_ok = start == 0 || !is_ident_char(bytes[start - 1] as char);
        let after_ok = end == bytes.len() || !is_ident_char(bytes[end] as char);
        if before_ok && after_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

/// Whitespace-insensitive form of a GLSL snippet.
///
/// Whitespace is dropped everywhere except between two identifier characters, where a
/// single space is kept. `vec4 f( vec2 _st )` and `vec4 f(vec2 _st)` map to the same key.
pub fn token_key(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    let mut last: Option<char> = None;
    for ch in s.chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && is_ident_char(ch) && last.is_some_and(is_ident_char) {
            out.push(' ');
        }
        pending_space = false;
        last = Some(ch);
        out.push(ch);
    }
    out
}

/// Indent every non-empty line of `body` by `indent`.
pub fn indent_lines(body: &str, indent: &str) -> String {
    body.lines()
        .map(|line| {
            let line = line.trim_end();
            if line.is_empty() {
                String::new()
            } else {
                format!("{indent}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
