//! `%VAR%` placeholder expansion and quote-aware command tokenization.
//!
//! Grounded in `original_source/ProcessIO.cpp`'s `expand_percent_vars` and
//! `original_source/JudgeBackend.cpp`'s `split_args_quoted`: both are small
//! hand-written scanners in the original, and this crate follows suit rather
//! than reaching for a regex dependency the teacher never uses for this class
//! of string processing (`sandbox::misc` takes the same hand-scanned approach
//! to `is_valid_c_string`).

use std::collections::HashMap;

/// Substitute `%KEY%` tokens in `s` using `vars`. A key absent from `vars` is
/// emitted verbatim, delimiters included, rather than treated as an error —
/// this lets compile command templates reference placeholders that only some
/// callers populate.
///
/// `expand(s, &HashMap::new()) == s` always holds, since every token is then
/// un-substitutable and falls back to the verbatim branch.
pub fn expand_percent_vars(s: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after_percent = &rest[start + 1..];

        match after_percent.find('%') {
            Some(rel_end) => {
                let key = &after_percent[..rel_end];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('%');
                        out.push_str(key);
                        out.push('%');
                    }
                }
                rest = &after_percent[rel_end + 1..];
            }
            None => {
                // Unterminated '%': emit it and the rest of the string verbatim.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Split a command string into argv tokens on whitespace, with double-quote
/// grouping: a `"` toggles "inside quotes" state, the quote characters
/// themselves are stripped from the emitted token, and quotes do not nest.
///
/// `tokenize("\"a b\" c") == ["a b", "c"]`; `tokenize("a  b") == ["a", "b"]`;
/// `tokenize("") == []`.
pub fn tokenize_quoted(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quote = false;

    for c in s.chars() {
        if c == '"' {
            in_quote = !in_quote;
        } else if c.is_whitespace() && !in_quote {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
        } else {
            cur.push(c);
        }
    }

    if !cur.is_empty() {
        out.push(cur);
    }

    out
}

/// Generate a random alphanumeric string of the given length, used to suffix
/// per-job work directories so successive judges never collide. Grounded in
/// `original_source/JudgeBackend.cpp`'s `random_string`.
pub fn random_alphanumeric(length: usize) -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0, CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_empty_map_is_identity() {
        assert_eq!("a%FOO%b", expand_percent_vars("a%FOO%b", &HashMap::new()));
    }

    #[test]
    fn expand_substitutes_known_keys() {
        let mut vars = HashMap::new();
        vars.insert("NAME", "sum".to_string());
        vars.insert("EXT", "cpp".to_string());
        assert_eq!("g++ sum.cpp -o sum", expand_percent_vars("g++ %NAME%.%EXT% -o %NAME%", &vars));
    }

    #[test]
    fn expand_leaves_unmatched_verbatim() {
        let mut vars = HashMap::new();
        vars.insert("NAME", "sum".to_string());
        assert_eq!("%MISSING% sum", expand_percent_vars("%MISSING% %NAME%", &vars));
    }

    #[test]
    fn expand_preserves_multi_byte_utf8_around_placeholders() {
        let mut vars = HashMap::new();
        vars.insert("NAME", "ño".to_string());
        assert_eq!("café %NAME%", expand_percent_vars("café %NAME%", &HashMap::new()));
        assert_eq!("café ño", expand_percent_vars("café %NAME%", &vars));
    }

    #[test]
    fn tokenize_quoted_groups() {
        assert_eq!(vec!["a b".to_string(), "c".to_string()], tokenize_quoted("\"a b\" c"));
    }

    #[test]
    fn tokenize_collapses_whitespace_runs() {
        assert_eq!(vec!["a".to_string(), "b".to_string()], tokenize_quoted("a  b"));
    }

    #[test]
    fn tokenize_empty_input() {
        assert!(tokenize_quoted("").is_empty());
    }

    #[test]
    fn random_alphanumeric_has_requested_length_and_alphabet() {
        let s = random_alphanumeric(16);
        assert_eq!(16, s.len());
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_alphanumeric_is_not_constant() {
        // Extremely unlikely to collide; guards against an accidental fixed seed.
        assert_ne!(random_alphanumeric(16), random_alphanumeric(16));
    }
}
