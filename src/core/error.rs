use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigInvalidValue,

    SshIdentityFileNotFound,
    RemoteCommandFailed,

    GitCommandFailed,

    DeployDeclined,
    DeployVerificationFailed,
    DeployMigrationFailed,
    DeployTestsFailed,
    DeployRollbackFailed,

    InternalIoError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::RemoteCommandFailed => "remote.command_failed",

            ErrorCode::GitCommandFailed => "git.command_failed",

            ErrorCode::DeployDeclined => "deploy.declined",
            ErrorCode::DeployVerificationFailed => "deploy.verification_failed",
            ErrorCode::DeployMigrationFailed => "deploy.migration_failed",
            ErrorCode::DeployTestsFailed => "deploy.tests_failed",
            ErrorCode::DeployRollbackFailed => "deploy.rollback_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Process exit code for this error class. Only the top-level run loop
    /// turns errors into exits.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorCode::ConfigMissingKey | ErrorCode::ConfigInvalidValue => 10,
            ErrorCode::SshIdentityFileNotFound | ErrorCode::RemoteCommandFailed => 20,
            ErrorCode::GitCommandFailed => 21,
            ErrorCode::DeployDeclined => 3,
            ErrorCode::DeployVerificationFailed => 30,
            ErrorCode::DeployMigrationFailed | ErrorCode::DeployTestsFailed => 31,
            ErrorCode::DeployRollbackFailed => 32,
            ErrorCode::InternalIoError | ErrorCode::InternalUnexpected => 70,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub host: String,
    pub last_line: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDetails {
    pub expected: String,
    pub actual: String,
    pub remote: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn config_missing_key(key: impl Into<String>, remote: Option<String>) -> Self {
        let key = key.into();
        let details = serde_json::to_value(ConfigMissingKeyDetails {
            key: key.clone(),
            remote,
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration value: {}", key),
            details,
        )
    }

    pub fn config_invalid_value(key: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for {}: {}", key.into(), problem.into()),
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn ssh_identity_file_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            format!("SSH identity file not found: {}", path),
            serde_json::json!({ "identityFile": path }),
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let details =
            serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::RemoteCommandFailed,
            "Remote command failed",
            details,
        )
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn declined(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCode::DeployDeclined,
            format!("Aborted: {}", action),
            serde_json::json!({ "action": action }),
        )
    }

    pub fn verification_failed(
        expected: impl Into<String>,
        actual: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        let details = serde_json::to_value(VerificationDetails {
            expected: expected.into(),
            actual: actual.into(),
            remote: remote.into(),
        })
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

        Self::new(
            ErrorCode::DeployVerificationFailed,
            "Commit hash verification failed",
            details,
        )
    }

    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeployMigrationFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn tests_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeployTestsFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn rollback_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeployRollbackFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
        .with_hint("Manual intervention required; no further automated recovery was attempted")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            serde_json::json!({ "error": error.into(), "context": context }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ErrorCode::ConfigMissingKey.as_str(), "config.missing_key");
        assert_eq!(
            ErrorCode::DeployRollbackFailed.as_str(),
            "deploy.rollback_failed"
        );
    }

    #[test]
    fn rollback_failed_carries_manual_intervention_hint() {
        let err = Error::rollback_failed("HEAD mismatch after reset");
        assert_eq!(err.code, ErrorCode::DeployRollbackFailed);
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn declined_is_distinct_from_failure() {
        let err = Error::declined("push to production");
        assert_eq!(err.code.exit_code(), 3);
        assert!(err.message.contains("push to production"));
    }
}
