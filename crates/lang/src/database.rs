
use std::fs::{self, File};
use std::io::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time;

use stilt_core::database::Database;
use crate::parser;
use crate::elaborator;
use crate::error::StiltError;

/// File loading on top of the core database: read a `.stt` file, parse
/// it, and elaborate its declarations into the top-level context.
pub trait DatabaseExt {
    fn load_source(&mut self, text: String) -> Result<(), StiltError>;
    fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), StiltError>;
    fn load_dir(&mut self, path: &Path) -> Result<(), StiltError>;
}

impl DatabaseExt for Database {
    fn load_source(&mut self, text: String) -> Result<(), StiltError> {
        let text = Arc::new(text);
        let commands = parser::parse_file(text.clone())?;
        elaborator::elaborate(self, text, &commands)
    }

    fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), StiltError> {
        let path = path.as_ref();
        let ext = path.extension().unwrap_or_default();
        if ext.to_string_lossy() != "stt" { return Ok(()) }

        let now = time::Instant::now();
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        let text = String::from_utf8(buffer)?;
        let result = self.load_source(text);
        log::info!("loaded {} in {}ms", path.display(), now.elapsed().as_millis());
        result
    }

    fn load_dir(&mut self, path: &Path) -> Result<(), StiltError> {
        let mut entries: Vec<_> = fs::read_dir(path)?
            .collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.path());
        let mut errors = Vec::new();
        for entry in entries {
            let path = entry.path();
            let result = if path.is_file() {
                self.load_file(&path)
            } else {
                self.load_dir(&path)
            };
            if let Err(error) = result {
                errors.push(error);
            }
        }
        if errors.is_empty() { Ok(()) }
        else { Err(StiltError::Collection(errors)) }
    }
}
