//! A reference evaluator plug-in implementing case-insensitive, whitespace-
//! tolerant line/word comparison, conforming to the `Judge` ABI that
//! `judge::evaluator::Evaluator::load` resolves.
//!
//! Named after and grounded on `original_source/C1LinesWordsIgnoreCase.c`
//! (an empty stub in the retrieval pack — only its name survives, so the
//! comparison semantics below are this crate's own reasonable reading of
//! "lines/words, ignore case": split both files into lines, each line into
//! whitespace-separated words, lowercase every word, and compare).

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double};
use std::path::{Path, PathBuf};

unsafe fn cstr_to_path(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(PathBuf::from)
}

fn normalized_lines(content: &str) -> Vec<Vec<String>> {
    content
        .lines()
        .map(|line| line.split_whitespace().map(|w| w.to_lowercase()).collect())
        .collect()
}

fn compare(expected: &Path, actual: &Path) -> (f64, String) {
    let expected_content = match std::fs::read_to_string(expected) {
        Ok(content) => content,
        Err(e) => return (0.0, format!("failed to read expected output: {}", e)),
    };
    let actual_content = match std::fs::read_to_string(actual) {
        Ok(content) => content,
        Err(e) => return (0.0, format!("failed to read contestant output: {}", e)),
    };

    let expected_lines = normalized_lines(&expected_content);
    let actual_lines = normalized_lines(&actual_content);

    if expected_lines == actual_lines {
        (1.0, "OK".to_string())
    } else {
        let mismatch_at = expected_lines
            .iter()
            .zip(actual_lines.iter())
            .position(|(e, a)| e != a);
        match mismatch_at {
            Some(line) => (0.0, format!("wrong answer on line {}", line + 1)),
            None => (0.0, format!(
                "wrong answer: expected {} line(s), got {}",
                expected_lines.len(),
                actual_lines.len(),
            )),
        }
    }
}

/// Allocate a `malloc`-backed, null-terminated copy of `s`, matching the
/// out-parameter's `__Freed_by_callee__` contract documented in
/// `original_source/JudgeAPI.h`: the loader calls `libc::free` on it.
unsafe fn alloc_comment(s: &str) -> *mut c_char {
    let c_string = match CString::new(s) {
        Ok(c_string) => c_string,
        Err(_) => CString::new("(comment contained an embedded NUL)").unwrap(),
    };
    let bytes = c_string.as_bytes_with_nul();
    let buf = libc::malloc(bytes.len()) as *mut c_char;
    if buf.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, buf, bytes.len());
    buf
}

/// `double Judge(contestantsDir, testsDir, testOutputs, testName, commentsOut)`.
/// Reads `contestantsDir/testOutputs` as the contestant's actual output and
/// `testsDir/testOutputs` as the expected output, scoring `1.0` on an exact
/// case-insensitive line/word match and `0.0` otherwise.
#[no_mangle]
pub unsafe extern "C" fn Judge(
    contestants_dir: *const c_char,
    tests_dir: *const c_char,
    test_outputs: *const c_char,
    _test_name: *const c_char,
    comments: *mut *mut c_char,
) -> c_double {
    let contestants_dir = match cstr_to_path(contestants_dir) {
        Some(path) => path,
        None => {
            if !comments.is_null() {
                *comments = alloc_comment("internal error: null contestantsDir");
            }
            return 0.0;
        }
    };
    let tests_dir = match cstr_to_path(tests_dir) {
        Some(path) => path,
        None => {
            if !comments.is_null() {
                *comments = alloc_comment("internal error: null testsDir");
            }
            return 0.0;
        }
    };
    let test_outputs = match test_outputs.is_null() {
        true => {
            if !comments.is_null() {
                *comments = alloc_comment("internal error: null testOutputs");
            }
            return 0.0;
        }
        false => CStr::from_ptr(test_outputs).to_string_lossy().into_owned(),
    };

    let (fraction, comment) = compare(&tests_dir.join(&test_outputs), &contestants_dir.join(&test_outputs));

    if !comments.is_null() {
        *comments = alloc_comment(&comment);
    }

    fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_scores_full_marks() {
        let (fraction, comment) = compare(Path::new("does-not-matter"), Path::new("does-not-matter"));
        // Both paths point at the same nonexistent file, so this exercises the
        // "failed to read" branch identically on both sides.
        assert_eq!(0.0, fraction);
        assert!(comment.contains("failed to read"));
    }

    #[test]
    fn normalization_ignores_case_and_extra_whitespace() {
        let a = normalized_lines("Hello   World\nFoo");
        let b = normalized_lines("hello world\nfoo");
        assert_eq!(a, b);
    }

    #[test]
    fn normalization_is_sensitive_to_word_order() {
        let a = normalized_lines("alpha beta");
        let b = normalized_lines("beta alpha");
        assert_ne!(a, b);
    }
}
