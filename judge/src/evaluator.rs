//! The Evaluator Plug-in Loader: dynamically loads a shared library by path,
//! resolves the `Judge` entry point, and exposes a uniform UTF-8
//! byte-string-based calling convention.
//!
//! Grounded directly in `original_source/JudgeAPI.h` / `JudgeAPI.cpp`: the
//! exported symbol name (`Judge`), the five-argument ABI with an out-parameter
//! for the comment, and the `.dll`-suffix / `lib`-prefix path rewriting rule
//! for POSIX dynamic loaders are all taken from there. `libloading` is reused
//! mechanically from `judge::languages::loader`'s existing dylib-loading
//! idiom, though this loader's ABI (`Judge`) is a distinct contract from that
//! module's `init_language_providers` ABI — see the design notes on "two
//! unrelated dynamic loaders".

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_double};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        Nul(::std::ffi::NulError);
        Libloading(::libloading::Error);
    }

    errors {
        SymbolNotFound(name: String) {
            description("entry point symbol not found in evaluator library")
            display("entry point symbol '{}' not found in evaluator library", name)
        }

        InvalidUtf8Comment {
            description("evaluator returned a comment that is not valid UTF-8")
        }
    }
}

/// The native ABI exposed by a conforming evaluator plug-in:
/// `double Judge(contestantsDir, testsDir, testOutputs, testName, commentsOut)`.
/// Each of the first four parameters is a null-terminated UTF-8 string;
/// `commentsOut` receives a plug-in-allocated null-terminated string that the
/// loader frees via `libc::free` after copying it into an owned `String`.
type JudgeEntryPoint = unsafe extern "C" fn(
    *const c_char,
    *const c_char,
    *const c_char,
    *const c_char,
    *mut *mut c_char,
) -> c_double;

/// A loaded evaluator plug-in. Keeps the `Library` alive for as long as the
/// resolved symbol may be called.
pub struct Evaluator {
    _library: Library,
    entry: JudgeEntryPoint,
}

/// Rewrite `path` for the current platform's dynamic loader conventions. On
/// POSIX, a trailing `.dll` becomes the native suffix (`.so`) and a missing
/// `lib` prefix is prepended to the basename; this is the only branch this
/// POSIX-only crate compiles (see SPEC_FULL.md §4.2 for the Windows branch
/// this mirrors in prose only).
fn rewrite_library_path(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let needs_native_ext = path.extension().and_then(|e| e.to_str()) == Some("dll");

    let file_name = if needs_native_ext || path.extension().is_none() {
        format!("{}.so", stem)
    } else {
        path.file_name().and_then(|f| f.to_str()).unwrap_or(stem).to_string()
    };

    let file_name = if file_name.starts_with("lib") {
        file_name
    } else {
        format!("lib{}", file_name)
    };

    dir.join(file_name)
}

impl Evaluator {
    /// Load the evaluator plug-in at `path`, applying the platform path
    /// rewriting rule and resolving the `Judge` symbol.
    pub fn load(path: &Path) -> Result<Evaluator> {
        let native_path = rewrite_library_path(path);
        let library = unsafe { Library::new(&native_path) }?;
        let entry: JudgeEntryPoint = unsafe {
            let symbol: Symbol<JudgeEntryPoint> = library.get(b"Judge\0")
                .map_err(|_| Error::from(ErrorKind::SymbolNotFound("Judge".to_string())))?;
            *symbol
        };

        Ok(Evaluator {
            _library: library,
            entry,
        })
    }

    /// Invoke the loaded evaluator. `test_outputs` is a `|`-delimited list of
    /// expected output filenames, matching the ABI's `testOutputs` parameter.
    /// Returns the fractional score in `[0.0, 1.0]` and the plug-in's
    /// UTF-8 comment.
    pub fn invoke(
        &self,
        contestants_dir: &Path,
        tests_dir: &Path,
        test_outputs: &str,
        test_name: &str,
    ) -> Result<(f64, String)> {
        let contestants_dir = CString::new(contestants_dir.to_string_lossy().into_owned())?;
        let tests_dir = CString::new(tests_dir.to_string_lossy().into_owned())?;
        let test_outputs = CString::new(test_outputs)?;
        let test_name = CString::new(test_name)?;

        let mut comments_out: *mut c_char = std::ptr::null_mut();
        let fraction = unsafe {
            (self.entry)(
                contestants_dir.as_ptr(),
                tests_dir.as_ptr(),
                test_outputs.as_ptr(),
                test_name.as_ptr(),
                &mut comments_out,
            )
        };

        let comment = if comments_out.is_null() {
            String::new()
        } else {
            let comment = unsafe { CStr::from_ptr(comments_out) }
                .to_str()
                .map_err(|_| Error::from(ErrorKind::InvalidUtf8Comment))?
                .to_owned();
            unsafe { libc::free(comments_out as *mut libc::c_void) };
            comment
        };

        Ok((fraction, comment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_adds_lib_prefix_and_native_suffix() {
        assert_eq!(
            PathBuf::from("/judgers/libdefault.so"),
            rewrite_library_path(Path::new("/judgers/default.dll"))
        );
    }

    #[test]
    fn rewrite_leaves_already_native_name_alone() {
        assert_eq!(
            PathBuf::from("/judgers/libdefault.so"),
            rewrite_library_path(Path::new("/judgers/libdefault.so"))
        );
    }
}
