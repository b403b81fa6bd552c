
use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::crate_version;
use colored::*;
use directories::ProjectDirs;
use thiserror::Error;

use rustyline::error::ReadlineError;
use rustyline::{CompletionType, Config, Editor};

use stilt_core::prelude::*;
use crate::database::DatabaseExt;

const REPL_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Error)]
enum ReplError {
    #[error("Unknown command {command:?}, try :help")]
    UnknownCommand {
        command: String
    },
    #[error("Expected a file path, as in `:load demo.stt`")]
    MissingFilePath,
    #[error("Expected a declared name, as in `:normalize two`")]
    MissingName,
    #[error("{name} is not declared")]
    UnknownName {
        name: String
    },
    #[error("{name} is a postulate and has no definition to normalize")]
    Postulate {
        name: String
    },
}

enum Outcome {
    Continue,
    Quit
}

fn print_preamble_text() {
    println!("stilt {0}", crate_version!());
    println!("Enter declarations, or type :help for commands")
}

fn print_help_text() {
    println!("  name : type = term   elaborate a declaration into the session");
    println!("  assume name : type   postulate a name");
    println!("  :load <path>         elaborate a .stt file or directory");
    println!("  :list                show everything declared so far");
    println!("  :normalize <name>    print the full normal form of a definition");
    println!("  :quit                leave the session");
}

fn print_declarations(db: &Database) {
    for entry in db.tops() {
        let marker = if entry.unfolded.is_some() { "" } else { "assumed " };
        println!("  {}{} : {}", marker, entry.name, entry.ty_term);
    }
}

fn print_normal_form(db: &Database, word: &str) -> Result<()> {
    let name = Symbol::from(word);
    let id = db.lookup_top(name)
        .ok_or_else(|| ReplError::UnknownName { name: word.to_string() })?;
    let entry = db.top(id).clone();
    match entry.unfolded {
        Some(unfolded) => {
            let value = unfolded.force(db);
            println!("{}", quote(db, value, 0.into(), true));
            Ok(())
        }
        None => Err(ReplError::Postulate { name: word.to_string() }.into())
    }
}

fn dispatch(db: &mut Database, line: &str) -> Result<Outcome> {
    let mut words = line.split_ascii_whitespace();
    match words.next() {
        None => Ok(Outcome::Continue),
        Some(":q") | Some(":quit") => Ok(Outcome::Quit),
        Some(":h") | Some(":help") => {
            print_help_text();
            Ok(Outcome::Continue)
        }
        Some(":list") => {
            print_declarations(db);
            Ok(Outcome::Continue)
        }
        Some(":l") | Some(":load") => {
            let path = words.next().ok_or(ReplError::MissingFilePath)?;
            let path = Path::new(path);
            let result = if path.is_dir() {
                db.load_dir(path)
            } else {
                db.load_file(path)
            };
            if let Err(error) = result {
                println!("{}", error);
            }
            Ok(Outcome::Continue)
        }
        Some(":n") | Some(":normalize") => {
            let name = words.next().ok_or(ReplError::MissingName)?;
            print_normal_form(db, name)?;
            Ok(Outcome::Continue)
        }
        Some(command) if command.starts_with(':') => {
            Err(ReplError::UnknownCommand { command: command.to_string() }.into())
        }
        Some(_) => {
            // anything else is a declaration for the running session
            if let Err(error) = db.load_source(format!("{}\n", line)) {
                println!("{}", error);
            }
            Ok(Outcome::Continue)
        }
    }
}

pub fn repl(db: &mut Database) {
    print_preamble_text();

    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<()>::with_config(config);

    let proj_dirs = ProjectDirs::from("", "", "stilt");
    if let Some(proj_dirs) = &proj_dirs {
        let path = proj_dirs.data_local_dir().join("repl_history.txt");
        rl.load_history(&path).ok();
        rl.history_mut().set_max_len(REPL_HISTORY_LIMIT);
    }

    loop {
        match rl.readline("stilt> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str());
                match dispatch(db, &line) {
                    Ok(Outcome::Continue) => { }
                    Ok(Outcome::Quit) => break,
                    Err(error) => println!("{} {}", "error:".red(), error)
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(error) => {
                println!("{} {}", "error:".red(), error);
                break
            }
        }
    }

    if let Some(proj_dirs) = &proj_dirs {
        let dir = proj_dirs.data_local_dir();
        fs::create_dir_all(dir).ok();
        rl.save_history(&dir.join("repl_history.txt")).ok();
    }
}
