
pub mod syntax;
pub mod parser;
pub mod elaborator;
pub mod error;
pub mod database;
pub mod repl;

#[cfg(test)]
mod tests {
    use std::path::Path;
    use anyhow::Result;
    use paste::paste;

    use stilt_core::database::Database;
    use crate::database::DatabaseExt;
    use crate::error::StiltError;

    // parsing and elaboration recurse with the nesting depth of the
    // source, and the stress corpora nest applications hundreds deep
    const TEST_STACK: usize = 256 * 1024 * 1024;

    fn test_runner(path: &'static str, expected_success: bool) -> Result<()> {
        let handle = std::thread::Builder::new()
            .stack_size(TEST_STACK)
            .spawn(move || run_file(path, expected_success))?;
        handle.join().map_err(|_| anyhow::anyhow!("test thread panicked"))?
    }

    fn run_file(path: &'static str, expected_success: bool) -> Result<()> {
        let mut db = Database::new();
        let mut builder = String::new();
        if expected_success { builder.push_str("tests/success/"); }
        else { builder.push_str("tests/failure/"); }
        builder.push_str(path);
        builder.push_str(".stt");
        let path = Path::new(builder.as_str());
        let result = db.load_file(path);
        if expected_success {
            result.map_err(|e| anyhow::anyhow!("{}", e))
        } else {
            let error = ||
                Err(anyhow::anyhow!("File succeeded when it should have failed."));
            result.err().map_or_else(error, |e| { eprintln!("{}", e); Ok(()) })
        }
    }

    macro_rules! test_file_success {
        ($name:ident) => {
            paste! {
                #[test]
                fn [<success_$name>]() -> Result<()> {
                    test_runner(stringify!($name), true)
                }
            }
        }
    }

    macro_rules! test_file_failure {
        ($name:ident) => {
            paste! {
                #[test]
                fn [<failure_$name>]() -> Result<()> {
                    test_runner(stringify!($name), false)
                }
            }
        }
    }

    test_file_success!(basics);
    test_file_success!(church);
    test_file_success!(postulates);
    test_file_success!(implicit);
    test_file_success!(vectors);
    test_file_success!(stlc);

    test_file_failure!(scope);
    test_file_failure!(mismatch);
    test_file_failure!(icitness);
    test_file_failure!(unsolved);
    test_file_failure!(named_implicit);
    test_file_failure!(collision);

    #[test]
    fn failed_declaration_does_not_stop_the_file() {
        let mut db = Database::new();
        let source = concat!(
            "broken : U = λ x. x\n",
            "fine : U = U\n",
            "uses_broken = broken\n"
        );
        let result = db.load_source(source.to_string());
        // the first and third declarations fail, the second still lands
        match result {
            Err(StiltError::Collection(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected two collected errors, got {:?}", other.err())
        }
        assert!(db.lookup_top("fine".into()).is_some());
        assert!(db.lookup_top("broken".into()).is_none());
    }

    #[test]
    fn unsolved_meta_is_reported_at_the_declaration() {
        let mut db = Database::new();
        let result = db.load_source("f : U = _\n".to_string());
        match result {
            Err(StiltError::Collection(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(
                    errors[0],
                    StiltError::Elaborator(crate::elaborator::ElabError::UnsolvedMetas { .. })
                ));
            }
            other => panic!("expected an unsolved-meta error, got {:?}", other.err())
        }
    }
}
