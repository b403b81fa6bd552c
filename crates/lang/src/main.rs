
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use stilt_core::database::Database;
use stilt_lang::database::DatabaseExt;
use stilt_lang::repl;

/// Elaborator for a small dependent type theory. With no arguments an
/// interactive session is started; otherwise the given `.stt` files and
/// directories are elaborated in order.
#[derive(Parser)]
#[command(name = "stilt", version, about)]
struct Args {
    /// Files or directories to elaborate
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::builder()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let args = Args::parse();
    let mut db = Database::new();

    if args.paths.is_empty() {
        repl::repl(&mut db);
        return ExitCode::SUCCESS
    }

    let mut failures = 0usize;
    for path in &args.paths {
        let result = if path.is_dir() {
            db.load_dir(path)
        } else {
            db.load_file(path)
        };
        if let Err(error) = result {
            failures += error.count();
            eprintln!("{}", error);
        }
    }

    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{} error(s)", failures);
        ExitCode::FAILURE
    }
}
