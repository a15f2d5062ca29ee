use std::fmt;

use tessera_server::TesseraError;

/// Failure of one CLI command. Engine errors keep their kind label so the
/// process exit status can tell a missing record from a broken data dir.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub kind: Option<&'static str>,
}

impl CliError {
    /// Exit status for `main`: 2 when the target is absent, 3 when the
    /// store refused the change, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self.kind {
            Some("not_found" | "version_not_found" | "backup_not_found") => 2,
            Some("immutable_conflict" | "invalid_key" | "invalid_relationship") => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "[{kind}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CliError {}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        CliError {
            message,
            kind: None,
        }
    }
}

impl From<&str> for CliError {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

impl From<TesseraError> for CliError {
    fn from(e: TesseraError) -> Self {
        CliError {
            message: e.to_string(),
            kind: Some(e.kind()),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        format!("Cannot encode output: {e}").into()
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        TesseraError::Io(e).into()
    }
}

pub type CliResult<T> = Result<T, CliError>;
