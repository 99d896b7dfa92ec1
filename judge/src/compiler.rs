//! The Compiler Resolver: maps a source file extension to a compile command
//! template, and parses the `CMD|@WorkDir=TEMPLATE` template syntax.
//!
//! Grounded in `original_source/JudgeBackend.cpp`'s `find_compiler` (a linear,
//! case-sensitive scan of the compiler table) and `parse_compiler_cmd` (split
//! once on `|`, validate the `@WorkDir=` prefix on the tail).

use crate::{CompilerItem, Error, ErrorKind, Result};

/// Find the first [`CompilerItem`] in `items` whose `ext` matches `ext`
/// exactly (case-sensitive, leading `.` significant).
pub fn find_compiler<'a>(items: &'a [CompilerItem], ext: &str) -> Option<&'a CompilerItem> {
    items.iter().find(|item| item.ext == ext)
}

/// A compiler command template split into its compile-command half and its
/// working-directory-template half.
pub struct ParsedCompilerCmd {
    pub raw_cmd: String,
    pub raw_workdir: String,
}

const WORKDIR_KEY: &str = "@WorkDir=";

/// Parse `cmd` of the form `"CMD|@WorkDir=TEMPLATE"`. Fails if there is no
/// `|` separator, or if the tail does not begin with `@WorkDir=` followed by
/// a non-empty template.
pub fn parse_compiler_cmd(cmd: &str) -> Result<ParsedCompilerCmd> {
    let sep = cmd.find('|')
        .ok_or_else(|| Error::from(ErrorKind::MalformedCompilerCommand(cmd.to_string())))?;

    let raw_cmd = cmd[..sep].to_string();
    let tail = &cmd[sep + 1..];

    if !tail.starts_with(WORKDIR_KEY) {
        bail!(ErrorKind::MalformedCompilerCommand(cmd.to_string()));
    }

    let raw_workdir = tail[WORKDIR_KEY.len()..].to_string();
    if raw_workdir.is_empty() {
        bail!(ErrorKind::MalformedCompilerCommand(cmd.to_string()));
    }

    Ok(ParsedCompilerCmd { raw_cmd, raw_workdir })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<CompilerItem> {
        vec![
            CompilerItem { ext: ".cpp".to_string(), cmd: "g++ %PATH% -o %NAME%|@WorkDir=%PATH%".to_string() },
            CompilerItem { ext: ".py".to_string(), cmd: "true|@WorkDir=%PATH%".to_string() },
        ]
    }

    #[test]
    fn find_compiler_matches_exact_extension() {
        assert!(find_compiler(&items(), ".cpp").is_some());
        assert!(find_compiler(&items(), ".java").is_none());
    }

    #[test]
    fn parse_compiler_cmd_splits_on_pipe() {
        let parsed = parse_compiler_cmd("g++ %PATH%|@WorkDir=%PATH%").unwrap();
        assert_eq!("g++ %PATH%", parsed.raw_cmd);
        assert_eq!("%PATH%", parsed.raw_workdir);
    }

    #[test]
    fn parse_compiler_cmd_rejects_missing_pipe() {
        assert!(parse_compiler_cmd("g++ %PATH%").is_err());
    }

    #[test]
    fn parse_compiler_cmd_rejects_missing_workdir_key() {
        assert!(parse_compiler_cmd("g++ %PATH%|Workdir=%PATH%").is_err());
    }

    #[test]
    fn parse_compiler_cmd_rejects_empty_workdir() {
        assert!(parse_compiler_cmd("g++ %PATH%|@WorkDir=").is_err());
    }
}
