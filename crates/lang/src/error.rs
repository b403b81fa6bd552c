
use std::io;
use std::fmt;
use std::error::Error;

use miette::{GraphicalReportHandler, GraphicalTheme};

use stilt_core::database::DatabaseError;
use crate::parser::ParseError;
use crate::elaborator::ElabError;

#[derive(Debug)]
pub enum StiltError {
    Parser(ParseError),
    Elaborator(ElabError),
    Database(DatabaseError),
    External(Box<dyn Error + Send + Sync>),
    Collection(Vec<StiltError>)
}

impl StiltError {
    /// Number of individual errors, for the exit code summary.
    pub fn count(&self) -> usize {
        match self {
            StiltError::Collection(list) => list.iter().map(StiltError::count).sum(),
            _ => 1
        }
    }
}

fn render_report(f: &mut fmt::Formatter<'_>, diagnostic: &dyn miette::Diagnostic) -> fmt::Result {
    let mut out = String::new();
    GraphicalReportHandler::new_themed(GraphicalTheme::unicode())
        .with_width(80)
        .render_report(&mut out, diagnostic)?;
    write!(f, "{}", out)
}

impl fmt::Display for StiltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StiltError::Parser(e) => render_report(f, e),
            StiltError::Elaborator(e) => render_report(f, e),
            StiltError::Database(e) => e.fmt(f),
            StiltError::External(e) => e.fmt(f),
            StiltError::Collection(list) => {
                for e in list.iter() {
                    e.fmt(f)?;
                    writeln!(f)?;
                }
                Ok(())
            }
        }
    }
}

impl Error for StiltError { }

impl From<ParseError> for StiltError {
    fn from(error: ParseError) -> Self { StiltError::Parser(error) }
}

impl From<ElabError> for StiltError {
    fn from(error: ElabError) -> Self { StiltError::Elaborator(error) }
}

impl From<DatabaseError> for StiltError {
    fn from(error: DatabaseError) -> Self { StiltError::Database(error) }
}

impl From<io::Error> for StiltError {
    fn from(error: io::Error) -> Self { StiltError::External(Box::new(error)) }
}

impl From<std::string::FromUtf8Error> for StiltError {
    fn from(error: std::string::FromUtf8Error) -> Self { StiltError::External(Box::new(error)) }
}
