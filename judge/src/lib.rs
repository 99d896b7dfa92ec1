//! This crate implements the core logic of the judge: compiling a submission,
//! executing it under resource limits against a sequence of subtests, scoring
//! the result through a dynamically loaded evaluator, and aggregating scores
//! across a judging pass.
//!

#[macro_use]
extern crate error_chain;
extern crate log;
extern crate libc;
extern crate nix;
extern crate sandbox;
extern crate libloading;
extern crate rand;
extern crate notify;
extern crate serde;
extern crate serde_yaml;

pub mod template;
pub mod runner;
pub mod evaluator;
pub mod compiler;
pub mod pipeline;
pub mod watcher;
pub mod config;

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Sandbox(sandbox::Error, sandbox::ErrorKind);
        Evaluator(evaluator::Error, evaluator::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Yaml(::serde_yaml::Error);
    }

    errors {
        ProblemNotFound(problem: String) {
            description("problem has no testcases")
            display("problem '{}' has no testcases", problem)
        }

        SourceNotFound(user: String, problem: String) {
            description("source file not found")
            display("source file for user '{}', problem '{}' not found", user, problem)
        }

        NoCompilerForExtension(ext: String) {
            description("no compiler registered for extension")
            display("no compiler registered for extension '{}'", ext)
        }

        MalformedCompilerCommand(cmd: String) {
            description("malformed compiler command template")
            display("malformed compiler command template: '{}'", cmd)
        }

        ExecutableNotFound {
            description("no executable produced by the compile step")
        }

        HistoryLogFailed(path: String) {
            description("failed to open per-job history log")
            display("failed to open per-job history log at '{}'", path)
        }

        Internal(msg: String) {
            description("internal error in the process runner")
            display("internal error: {}", msg)
        }
    }
}

/// A single named subtest under a [`Testcases`] entry. `-1` sentinels on
/// `memory_limit`, `time_limit` and `mark` mean "inherit the parent
/// `Testcases`'s value" — see [`Subtest::effective`].
#[derive(Clone, Debug, Deserialize)]
pub struct Subtest {
    pub name: String,
    pub memory_limit: i64,
    pub time_limit: f64,
    pub mark: f64,
}

/// The full per-problem judging metadata: I/O file naming, the evaluator to
/// invoke, default limits, and the ordered list of subtests to run.
#[derive(Clone, Debug, Deserialize)]
pub struct Testcases {
    pub name: String,
    pub input_file: String,
    pub output_file: String,
    pub evaluator_name: String,
    #[serde(default)]
    pub use_stdin: bool,
    #[serde(default)]
    pub use_stdout: bool,
    pub memory_limit: u64,
    pub time_limit: f64,
    pub mark: f64,
    #[serde(default)]
    pub subtests: Vec<Subtest>,
}

/// Resolved per-subtest limits and mark, after applying the `-1`-means-inherit
/// rule against the owning [`Testcases`].
#[derive(Clone, Copy, Debug)]
pub struct EffectiveSubtestParams {
    pub memory_limit_mb: u64,
    pub time_limit: f64,
    pub mark: f64,
}

impl Subtest {
    /// Resolve this subtest's effective limits and mark, substituting `tests`'
    /// value wherever this subtest carries the `-1` inherit sentinel.
    pub fn effective(&self, tests: &Testcases) -> EffectiveSubtestParams {
        EffectiveSubtestParams {
            memory_limit_mb: if self.memory_limit < 0 {
                tests.memory_limit
            } else {
                self.memory_limit as u64
            },
            time_limit: if self.time_limit < 0.0 {
                tests.time_limit
            } else {
                self.time_limit
            },
            mark: if self.mark < 0.0 {
                tests.mark
            } else {
                self.mark
            },
        }
    }
}

/// Maps a source file extension to a compile command template and a
/// working-directory template. See [`compiler::parse_compiler_cmd`] for the
/// `CMD|@WorkDir=TEMPLATE` syntax this field follows.
#[derive(Clone, Debug, Deserialize)]
pub struct CompilerItem {
    pub ext: String,
    pub cmd: String,
}

/// Policy fields carried through from the configuration file. Only
/// `contest_house` is consumed by the core; the remaining fields exist for
/// configuration-file compatibility and are otherwise inert.
#[derive(Clone, Debug, Deserialize)]
pub struct Environment {
    pub identifier: String,
    #[serde(default)]
    pub submit_dir: String,
    #[serde(default)]
    pub decompress_dir: String,
    #[serde(default)]
    pub active_security: bool,
    pub contest_house: String,
    #[serde(default)]
    pub admin_user_name: String,
    #[serde(default)]
    pub admin_password: String,
    #[serde(default)]
    pub admin_domain: String,
}

/// The full judge configuration: the compiler table plus environment policy.
/// Immutable after load; shared read-only across every job in a pass.
#[derive(Clone, Debug, Deserialize)]
pub struct Configuration {
    pub compiler: Vec<CompilerItem>,
    pub environment: Environment,
}

/// Mapping from `(user, problem)` to the last computed score for that pair.
pub type ScoreTable = HashMap<(String, String), f64>;

/// Bundles the state that the original judge kept as process-wide singletons
/// (the loaded compiler/evaluator table, the score map, the job counter) into
/// a single explicitly-passed value, per the "global mutable state" design
/// note: callers thread `&mut JudgeContext` through the pipeline instead of
/// touching statics.
pub struct JudgeContext {
    pub configuration: Configuration,
    pub problems: HashMap<String, Testcases>,
    pub evaluator_search_root: PathBuf,
    pub scores: ScoreTable,
    pub job_counter: u64,
    pub keep_workdirs: bool,
}

impl JudgeContext {
    pub fn new(
        configuration: Configuration,
        problems: HashMap<String, Testcases>,
        evaluator_search_root: PathBuf,
    ) -> JudgeContext {
        JudgeContext {
            configuration,
            problems,
            evaluator_search_root,
            scores: ScoreTable::new(),
            job_counter: 0,
            keep_workdirs: false,
        }
    }

    /// Allocate the next job index, used to name the per-job history log file.
    pub fn next_job_index(&mut self) -> u64 {
        self.job_counter += 1;
        self.job_counter
    }
}

/// A `(user, problem)` job's identifying coordinates and the paths it
/// operates over. Ephemeral: lives on the stack for the duration of one call
/// to [`pipeline::judge_one`].
pub struct JudgeJob {
    pub submissions_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub problem: String,
    pub user: String,
}
