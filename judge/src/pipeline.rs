//! The Judging Pipeline: orchestrates one `(user, problem)` job end to end —
//! locate source, resolve compiler, materialize a work directory, compile,
//! locate the executable, run every subtest under limits, invoke the
//! evaluator, and record the aggregate score.
//!
//! Grounded wholesale in `original_source/JudgeBackend.cpp`'s `judge()`
//! function; the staged shape (compile → discover executable → iterate
//! subtests → finalize) follows `judge/src/engine/mod.rs`'s modular
//! engine layout rather than the older flat `engine.rs` — see the "engine
//! module duplication" design note for why.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::evaluator::Evaluator;
use crate::runner::{run_process, RunOutcome};
use crate::template::{expand_percent_vars, random_alphanumeric, tokenize_quoted};
use crate::{compiler, Error, ErrorKind, JudgeContext, JudgeJob, Result};

/// Hard compile time limit, per SPEC_FULL.md §4.4 step 6.
const COMPILE_TIME_LIMIT_SECS: f64 = 60.0;

/// A line-buffered writer into the per-job `$History/<idx>[user][problem].txt`
/// log file, which also mirrors every line to the process-wide `log` target.
struct JobLog {
    file: File,
    user: String,
    problem: String,
}

impl JobLog {
    fn open(submissions_dir: &Path, idx: u64, user: &str, problem: &str) -> Result<JobLog> {
        let history_dir = submissions_dir.join("$History");
        std::fs::create_dir_all(&history_dir)?;

        let file_name = format!("{}[{}][{}].txt", idx, user, problem);
        let path = history_dir.join(&file_name);
        let file = File::create(&path)
            .map_err(|_| Error::from(ErrorKind::HistoryLogFailed(path.display().to_string())))?;

        Ok(JobLog { file, user: user.to_string(), problem: problem.to_string() })
    }

    fn info(&mut self, msg: &str) {
        info!("[{}/{}] {}", self.user, self.problem, msg);
        let _ = writeln!(self.file, "{}", msg);
    }

    fn error(&mut self, msg: &str) {
        error!("[{}/{}] {}", self.user, self.problem, msg);
        let _ = writeln!(self.file, "{}", msg);
    }
}

/// Find the first regular file in `dir` whose file stem equals `problem`.
/// Directory iteration order is OS-dependent, so when a user's directory
/// contains more than one file sharing the problem's stem, which one wins is
/// nondeterministic by construction — see the "duplicate source file
/// ambiguity" design note. This function does not attempt to impose an
/// ordering the original never had.
fn find_source_file(dir: &Path, problem: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.file_stem().and_then(|s| s.to_str()) == Some(problem) {
            return Some(path);
        }
    }
    None
}

/// Find the first regular, owner-executable file in `dir`.
fn find_executable(dir: &Path) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        if metadata.permissions().mode() & 0o100 != 0 {
            return Some(path);
        }
    }
    None
}

/// Clean up `job`'s work directory (unless [`JudgeContext::keep_workdirs`] is
/// set) without recording any score, for the paths where judging stopped
/// before the subtest loop ever ran. Per the ScoreTable invariant, a job that
/// never reaches the subtest loop leaves its `(user, problem)` key absent
/// rather than recording a zero — unlike a subtest that TLEs/IRs/OLEs after
/// the loop has started, which does contribute a (zero) term to an already-
/// recorded score.
fn finish_unrecorded(ctx: &JudgeContext, work_dir: &Path) -> Result<()> {
    if !ctx.keep_workdirs {
        let _ = std::fs::remove_dir_all(work_dir);
    }
    Ok(())
}

/// Run one `(user, problem)` job to completion.
///
/// Two distinct failure shapes exist. Environment/configuration problems that
/// mean this job was never judgeable (unknown problem, missing source, no
/// registered compiler, an executable the compile step never produced) are
/// returned as `Err` carrying one of the dedicated [`ErrorKind`] variants, so
/// a caller driving a batch can log each distinctly and decide whether to
/// keep going. A compile failure or a failure to load the problem's evaluator
/// is instead a judged outcome of the submission itself: it is logged and
/// returned as `Ok(())`, but since neither reaches the subtest loop, no entry
/// is written to the score table at all — the `(user, problem)` key stays
/// absent, per the ScoreTable invariant.
pub fn judge_one(ctx: &mut JudgeContext, job: &JudgeJob) -> Result<()> {
    let idx = ctx.next_job_index();
    let mut log = match JobLog::open(&job.submissions_dir, idx, &job.user, &job.problem) {
        Ok(log) => log,
        Err(e) => {
            error!("failed to open history log for [{}/{}]: {}", job.user, job.problem, e);
            return Ok(());
        }
    };

    let tests = match ctx.problems.get(&job.problem) {
        Some(tests) => tests.clone(),
        None => {
            log.error(&format!("problem '{}' has no testcases", job.problem));
            return Err(ErrorKind::ProblemNotFound(job.problem.clone()).into());
        }
    };

    let source_dir = job.submissions_dir.join(&job.user);
    let source_file = match find_source_file(&source_dir, &job.problem) {
        Some(path) => path,
        None => {
            log.info("source file not found");
            return Err(ErrorKind::SourceNotFound(job.user.clone(), job.problem.clone()).into());
        }
    };

    let ext = source_file.extension().and_then(|e| e.to_str()).unwrap_or("").to_string();
    let ext_with_dot = format!(".{}", ext);
    let stem = source_file.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();

    let compiler_item = match compiler::find_compiler(&ctx.configuration.compiler, &ext_with_dot) {
        Some(item) => item.clone(),
        None => {
            log.error(&format!("no compiler for extension {}", ext_with_dot));
            return Err(ErrorKind::NoCompilerForExtension(ext_with_dot).into());
        }
    };

    let parsed = match compiler::parse_compiler_cmd(&compiler_item.cmd) {
        Ok(parsed) => parsed,
        Err(e) => {
            log.error("malformed compiler command");
            return Err(e);
        }
    };

    let work_root = PathBuf::from(&ctx.configuration.environment.contest_house)
        .join("judgeWORK")
        .join(random_alphanumeric(16));
    let mut workdir_vars = HashMap::new();
    workdir_vars.insert("PATH", work_root.to_string_lossy().into_owned());
    let work_dir = PathBuf::from(expand_percent_vars(&parsed.raw_workdir, &workdir_vars));

    std::fs::create_dir_all(&work_dir)?;

    let dest_source = work_dir.join(source_file.file_name().unwrap());
    std::fs::copy(&source_file, &dest_source)?;

    let absolute_source = std::fs::canonicalize(&source_file).unwrap_or(source_file.clone());
    let mut cmd_vars = HashMap::new();
    cmd_vars.insert("NAME", stem);
    cmd_vars.insert("EXT", ext);
    cmd_vars.insert("PATH", absolute_source.to_string_lossy().into_owned());
    let compile_cmd = expand_percent_vars(&parsed.raw_cmd, &cmd_vars);

    log.info(&format!("compiling with [{}] at [{}]", compile_cmd, work_dir.display()));

    let argv = tokenize_quoted(&compile_cmd);
    let compile_outcome = run_process(&argv, &work_dir, None, COMPILE_TIME_LIMIT_SECS, 0)?;
    match compile_outcome {
        RunOutcome::Completed(result) if result.exit_code == 0 => (),
        RunOutcome::Completed(result) => {
            log.error("compiling failed");
            log.error(&format!("stderr:\n{}", String::from_utf8_lossy(&result.stderr)));
            log.error(&format!("stdout:\n{}", String::from_utf8_lossy(&result.stdout)));
            return finish_unrecorded(ctx, &work_dir);
        }
        RunOutcome::IrregularExit(code) => {
            log.error(&format!("compiling failed, exit code {:#x}", code));
            return finish_unrecorded(ctx, &work_dir);
        }
        RunOutcome::TimeLimitExceeded => {
            log.error("compiling timed out");
            return finish_unrecorded(ctx, &work_dir);
        }
        RunOutcome::OutputLimitExceeded => {
            log.error("compiler produced too much output");
            return finish_unrecorded(ctx, &work_dir);
        }
    }

    let executable = match find_executable(&work_dir) {
        Some(path) => path,
        None => {
            log.error("executable not found");
            return Err(ErrorKind::ExecutableNotFound.into());
        }
    };

    log.info(&format!("compiled successfully at {}", executable.display()));

    let evaluator_path = ctx.evaluator_search_root.join(&tests.evaluator_name);
    let evaluator = match Evaluator::load(&evaluator_path) {
        Ok(evaluator) => evaluator,
        Err(e) => {
            log.error(&format!("failed to load evaluator: {}", e));
            return finish_unrecorded(ctx, &work_dir);
        }
    };
    log.info("loaded evaluator successfully");

    let mut points = 0.0f64;

    for subtest in &tests.subtests {
        let effective = subtest.effective(&tests);
        let testcase_dir = job.tests_dir.join(&job.problem).join(&subtest.name);

        let _ = std::fs::remove_file(work_dir.join(&tests.input_file));
        let _ = std::fs::remove_file(work_dir.join(&tests.output_file));

        log.info(&format!("judging {}...", subtest.name));

        let stdin_data = if tests.use_stdin {
            match std::fs::read(testcase_dir.join(&tests.input_file)) {
                Ok(data) => Some(data),
                Err(e) => {
                    log.error(&format!("failed to read input for {}: {}", subtest.name, e));
                    continue;
                }
            }
        } else {
            if std::fs::copy(testcase_dir.join(&tests.input_file), work_dir.join(&tests.input_file)).is_err() {
                log.error(&format!("failed to stage input for {}", subtest.name));
                continue;
            }
            if !tests.use_stdout {
                if std::fs::copy(testcase_dir.join(&tests.output_file), work_dir.join(&tests.output_file)).is_err() {
                    log.error(&format!("failed to stage output slot for {}", subtest.name));
                    continue;
                }
            }
            None
        };

        let exe_argv = vec![executable.to_string_lossy().into_owned()];
        let outcome = run_process(
            &exe_argv,
            &work_dir,
            stdin_data.as_deref(),
            effective.time_limit,
            effective.memory_limit_mb,
        )?;

        let result = match outcome {
            RunOutcome::Completed(result) => result,
            RunOutcome::TimeLimitExceeded => {
                log.error(&format!("TLEd {}", subtest.name));
                continue;
            }
            RunOutcome::OutputLimitExceeded => {
                log.error(&format!("OLEd {}", subtest.name));
                continue;
            }
            RunOutcome::IrregularExit(code) => {
                log.error(&format!("exited with code {:#x}", code));
                continue;
            }
        };

        log.info(&format!("time ~{:.3} seconds", result.cpu_seconds));

        if tests.use_stdout {
            // Written into `work_dir`, not `testcase_dir`: the evaluator reads
            // the contestant's actual output from `contestantsDir` (= work_dir)
            // and the expected output from `testsDir`, so the tests directory's
            // expected output must stay intact.
            if let Err(e) = std::fs::write(work_dir.join(&tests.output_file), &result.stdout) {
                log.error(&format!("failed to write actual output for {}: {}", subtest.name, e));
                continue;
            }
        }

        let (fraction, comment) = match evaluator.invoke(
            &work_dir,
            &testcase_dir,
            &tests.output_file,
            &job.problem,
        ) {
            Ok(v) => v,
            Err(e) => {
                log.error(&format!("evaluator invocation failed for {}: {}", subtest.name, e));
                continue;
            }
        };

        let subtest_points = fraction * effective.mark;
        log.info(&format!("[{}]: {}:\n{}", subtest.name, subtest_points, comment));
        points += subtest_points;
    }

    log.info(&format!("total: {}", points));
    ctx.scores.insert((job.user.clone(), job.problem.clone()), points);

    if !ctx.keep_workdirs {
        let _ = std::fs::remove_dir_all(&work_dir);
    }

    Ok(())
}
