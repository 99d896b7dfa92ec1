#[macro_use]
extern crate error_chain;
extern crate clap;
extern crate ctrlc;
extern crate judge;
extern crate log;
extern crate stderrlog;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use error_chain::ChainedError;
use log::{error, info};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Judge(::judge::Error, ::judge::ErrorKind);
    }
}

fn get_arg_matches() -> clap::ArgMatches<'static> {
    clap::App::new("judge-bin")
        .version("0.1.0")
        .author("Lancern <msrlancern@126.com>")
        .about("Compiles, sandboxes and scores competitive-programming submissions.")
        .arg(clap::Arg::with_name("submissions")
            .long("submissions")
            .required(true)
            .takes_value(true)
            .value_name("SUBMISSIONS_DIR")
            .help("directory containing one subdirectory per user's submissions"))
        .arg(clap::Arg::with_name("tests")
            .long("tests")
            .required(true)
            .takes_value(true)
            .value_name("TESTS_DIR")
            .help("directory containing one subdirectory per problem's testcases"))
        .arg(clap::Arg::with_name("settings")
            .long("settings")
            .takes_value(true)
            .value_name("SETTINGS_FILE")
            .help("path to the YAML configuration file (omit for the built-in defaults)"))
        .arg(clap::Arg::with_name("judge_paths")
            .long("judge-paths")
            .takes_value(true)
            .value_name("EVALUATORS_DIR")
            .default_value("./judgers")
            .help("directory searched for evaluator plug-in shared libraries"))
        .arg(clap::Arg::with_name("wait_submittor_mode")
            .long("wait-submittor-mode")
            .help("watch SUBMISSIONS_DIR for new or modified .cpp files instead of judging once"))
        .arg(clap::Arg::with_name("keep_workdirs")
            .long("keep-workdirs")
            .help("do not delete per-submission work directories after judging"))
        .arg(clap::Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .multiple(true)
            .help("increase log verbosity (repeatable)"))
        .get_matches()
}

/// Load every problem's `Settings.cfg` found directly under `tests_dir`'s
/// immediate subdirectories, keyed by subdirectory (problem) name.
fn load_problems(tests_dir: &std::path::Path) -> Result<HashMap<String, judge::Testcases>> {
    let mut problems = HashMap::new();

    let entries = std::fs::read_dir(tests_dir)
        .map_err(|e| Error::from(format!("failed to read tests directory: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::from(format!("failed to read tests directory entry: {}", e)))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let problem = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let settings_path = path.join("Settings.cfg");
        if !settings_path.exists() {
            continue;
        }

        let testcases = judge::config::load_testcases(&settings_path)?;
        problems.insert(problem, testcases);
    }

    Ok(problems)
}

/// Every `(user, problem)` pair implied by `submissions_dir`'s layout: one
/// subdirectory per user, one judgeable source per problem known to `problems`.
fn discover_jobs(
    submissions_dir: &std::path::Path,
    problems: &HashMap<String, judge::Testcases>,
) -> Result<Vec<(String, String)>> {
    let mut jobs = Vec::new();

    let entries = std::fs::read_dir(submissions_dir)
        .map_err(|e| Error::from(format!("failed to read submissions directory: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::from(format!("failed to read submissions directory entry: {}", e)))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("$History") {
            continue;
        }

        let user = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        for problem in problems.keys() {
            jobs.push((user.clone(), problem.clone()));
        }
    }

    Ok(jobs)
}

/// Render the score table as a column-aligned `user | problem | score` table,
/// sorted by `(user, problem)`.
fn render_scoreboard(scores: &judge::ScoreTable) {
    let mut rows: Vec<(&(String, String), &f64)> = scores.iter().collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    if rows.is_empty() {
        println!("(no scores recorded)");
        return;
    }

    let user_width = rows.iter().map(|((u, _), _)| u.len()).max().unwrap_or(4).max(4);
    let problem_width = rows.iter().map(|((_, p), _)| p.len()).max().unwrap_or(7).max(7);

    println!("{:user_width$}  {:problem_width$}  {:>8}", "user", "problem", "score",
        user_width = user_width, problem_width = problem_width);
    for ((user, problem), score) in rows {
        println!("{:user_width$}  {:problem_width$}  {:>8.2}", user, problem, score,
            user_width = user_width, problem_width = problem_width);
    }
}

fn do_main() -> Result<()> {
    let matches = get_arg_matches();

    stderrlog::new()
        .quiet(false)
        .verbosity(1 + matches.occurrences_of("verbose") as usize)
        .init()
        .unwrap();

    let submissions_dir = PathBuf::from(matches.value_of("submissions").unwrap());
    let tests_dir = PathBuf::from(matches.value_of("tests").unwrap());
    let evaluator_search_root = PathBuf::from(matches.value_of("judge_paths").unwrap());

    let configuration = match matches.value_of("settings") {
        Some(path) => judge::config::load_configuration(&PathBuf::from(path))?,
        None => judge::config::default_configuration(),
    };

    let problems = load_problems(&tests_dir)?;
    info!("loaded {} problem(s) from {}", problems.len(), tests_dir.display());

    let mut ctx = judge::JudgeContext::new(configuration, problems, evaluator_search_root);
    ctx.keep_workdirs = matches.is_present("keep_workdirs");

    if matches.is_present("wait_submittor_mode") {
        run_watch_mode(&submissions_dir, &tests_dir, ctx)
    } else {
        run_batch_mode(&submissions_dir, &tests_dir, ctx)
    }
}

fn run_batch_mode(
    submissions_dir: &std::path::Path,
    tests_dir: &std::path::Path,
    mut ctx: judge::JudgeContext,
) -> Result<()> {
    let jobs = discover_jobs(submissions_dir, &ctx.problems)?;
    info!("discovered {} job(s)", jobs.len());

    for (user, problem) in jobs {
        let job = judge::JudgeJob {
            submissions_dir: submissions_dir.to_path_buf(),
            tests_dir: tests_dir.to_path_buf(),
            problem,
            user,
        };
        if let Err(e) = judge::pipeline::judge_one(&mut ctx, &job) {
            error!("job [{}/{}] aborted: {}", job.user, job.problem, e.display_chain());
        }
    }

    render_scoreboard(&ctx.scores);
    Ok(())
}

fn run_watch_mode(
    submissions_dir: &std::path::Path,
    tests_dir: &std::path::Path,
    ctx: judge::JudgeContext,
) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let ctrlc_shutdown = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("shutdown requested, finishing the in-flight job and exiting");
        ctrlc_shutdown.store(true, Ordering::SeqCst);
    }).map_err(|e| Error::from(format!("failed to install signal handler: {}", e)))?;

    let ctx = std::sync::Mutex::new(ctx);
    let tests_dir = tests_dir.to_path_buf();

    let mut watcher = judge::watcher::SubmissionWatcher::start(submissions_dir, Box::new(move |path| {
        let problem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => return,
        };
        let user = match path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return,
        };

        let mut ctx = ctx.lock().unwrap();
        if !ctx.problems.contains_key(&problem) {
            return;
        }

        let job = judge::JudgeJob {
            submissions_dir: path.ancestors().nth(2).map(|p| p.to_path_buf())
                .unwrap_or_else(|| path.to_path_buf()),
            tests_dir: tests_dir.clone(),
            problem,
            user,
        };
        if let Err(e) = judge::pipeline::judge_one(&mut ctx, &job) {
            error!("job [{}/{}] aborted: {}", job.user, job.problem, e.display_chain());
        }
        render_scoreboard(&ctx.scores);
    }))?;

    info!("watching {} for submissions (Ctrl-C to stop)", submissions_dir.display());
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    watcher.stop();
    Ok(())
}

fn main() {
    if let Err(e) = do_main() {
        eprintln!("error: {}", e.display_chain());
        std::process::exit(255);
    }
}
