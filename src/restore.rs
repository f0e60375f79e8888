//! Restore pipeline building blocks: interactive selection, confirmation and
//! the `psql` invocations.
//!
//! The restore itself runs under `psql --single-transaction`, so a failing
//! statement rolls the whole dump back. Dumps mixing transactional and
//! non-transactional statements can still leave partial effects behind; the
//! operator sees psql's stderr either way.

use std::io::{BufRead, Write};
use std::time::Duration;

use crate::common::{format_file_size, ArtifactInfo};
use crate::{OrchestratorError, Result};

pub const RESTORE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// `psql` invocation that streams a dump into the target database.
pub fn restore_command(user: &str, database: &str) -> Vec<String> {
    vec![
        "psql".to_string(),
        format!("--username={user}"),
        format!("--dbname={database}"),
        "--single-transaction".to_string(),
    ]
}

/// Lightweight post-restore probe.
pub fn verify_command(user: &str, database: &str) -> Vec<String> {
    vec![
        "psql".to_string(),
        format!("--username={user}"),
        format!("--dbname={database}"),
        "--command".to_string(),
        "SELECT 1".to_string(),
    ]
}

/// Renders the numbered artifact list (newest first) and reads a 1-based
/// selection; `0` cancels. Returns the index into `artifacts`.
pub fn select_artifact<R: BufRead, W: Write>(
    artifacts: &[ArtifactInfo],
    input: &mut R,
    output: &mut W,
) -> Result<usize> {
    if artifacts.is_empty() {
        return Err(OrchestratorError::ValidationFailed(
            "no backups available to restore".to_string(),
        ));
    }

    writeln!(output, "Available backups:")?;
    for (i, artifact) in artifacts.iter().enumerate() {
        writeln!(
            output,
            "  {}. {}  {}  {}",
            i + 1,
            artifact.name,
            format_file_size(artifact.size_bytes),
            artifact.modified.format("%Y-%m-%d %H:%M:%S")
        )?;
    }

    loop {
        write!(output, "Select a backup to restore (0 to cancel): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(OrchestratorError::Cancelled);
        }
        let line = line.trim();
        if line == "0" {
            return Err(OrchestratorError::Cancelled);
        }
        match line.parse::<usize>() {
            Ok(n) if (1..=artifacts.len()).contains(&n) => return Ok(n - 1),
            _ => writeln!(
                output,
                "Enter a number between 0 and {}.",
                artifacts.len()
            )?,
        }
    }
}

/// Requires an explicit affirmative before the live schema is replaced.
/// `y`/`yes` (case-insensitive) proceeds; `n`/`no`/empty denies; anything
/// else reprompts.
pub fn confirm_restore<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<()> {
    loop {
        write!(output, "This will overwrite ALL existing data. Continue? (y/N): ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(OrchestratorError::ConfirmationDenied);
        }
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => return Ok(()),
            "n" | "no" | "" => return Err(OrchestratorError::ConfirmationDenied),
            _ => writeln!(output, "Please answer 'y' or 'n'.")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;
    use std::path::PathBuf;

    fn artifact(name: &str, minutes: u32) -> ArtifactInfo {
        ArtifactInfo {
            name: name.to_string(),
            path: PathBuf::from(format!("{name}.sql")),
            size_bytes: 1024,
            modified: Utc.with_ymd_and_hms(2025, 3, 10, 12, minutes, 0).unwrap(),
            sidecar: None,
        }
    }

    // Newest-first ordering comes from the store; index 0 is the newest.
    fn sample() -> Vec<ArtifactInfo> {
        vec![artifact("c", 30), artifact("b", 20), artifact("a", 10)]
    }

    #[test]
    fn selects_by_number() {
        let artifacts = sample();
        let mut input = Cursor::new(b"2\n".to_vec());
        let mut output = Vec::new();
        let idx = select_artifact(&artifacts, &mut input, &mut output).unwrap();
        assert_eq!(artifacts[idx].name, "b");

        let rendered = String::from_utf8(output).unwrap();
        assert!(rendered.contains("1. c"));
        assert!(rendered.contains("2. b"));
        assert!(rendered.contains("3. a"));
    }

    #[test]
    fn zero_cancels() {
        let artifacts = sample();
        let mut input = Cursor::new(b"0\n".to_vec());
        let mut output = Vec::new();
        let err = select_artifact(&artifacts, &mut input, &mut output).unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled));
    }

    #[test]
    fn reprompts_on_garbage_then_accepts() {
        let artifacts = sample();
        let mut input = Cursor::new(b"nope\n9\n1\n".to_vec());
        let mut output = Vec::new();
        let idx = select_artifact(&artifacts, &mut input, &mut output).unwrap();
        assert_eq!(artifacts[idx].name, "c");
    }

    #[test]
    fn empty_list_is_a_validation_failure() {
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();
        let err = select_artifact(&[], &mut input, &mut output).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationFailed(_)));
    }

    #[test]
    fn confirmation_accepts_yes_variants() {
        for answer in ["y\n", "Y\n", "yes\n", "YES\n"] {
            let mut input = Cursor::new(answer.as_bytes().to_vec());
            let mut output = Vec::new();
            assert!(confirm_restore(&mut input, &mut output).is_ok(), "{answer}");
        }
    }

    #[test]
    fn confirmation_denies_no_and_default() {
        for answer in ["n\n", "no\n", "\n"] {
            let mut input = Cursor::new(answer.as_bytes().to_vec());
            let mut output = Vec::new();
            let err = confirm_restore(&mut input, &mut output).unwrap_err();
            assert!(matches!(err, OrchestratorError::ConfirmationDenied), "{answer}");
        }
    }

    #[test]
    fn restore_command_is_single_transaction() {
        let argv = restore_command("postgres", "pc_db");
        assert_eq!(
            argv,
            vec![
                "psql",
                "--username=postgres",
                "--dbname=pc_db",
                "--single-transaction"
            ]
        );
    }
}
