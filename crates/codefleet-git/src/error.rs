//! Git error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),

    #[error("repository locked: {0}")]
    Locked(String),

    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("no working copy for {0}")]
    MissingWorkingCopy(String),
}

impl GitError {
    /// Classify a failed git invocation by its stderr.
    pub fn from_stderr(command: &str, stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();
        if lower.contains("index.lock")
            || (lower.contains("unable to create") && lower.contains(".lock"))
        {
            GitError::Locked(message)
        } else if lower.contains("could not resolve host")
            || lower.contains("unable to access")
            || lower.contains("connection refused")
            || lower.contains("connection timed out")
            || lower.contains("connection reset")
            || lower.contains("could not read from remote repository")
        {
            GitError::Network(message)
        } else {
            GitError::CommandFailed {
                command: command.to_string(),
                message,
            }
        }
    }
}

impl From<GitError> for codefleet_core::Error {
    fn from(err: GitError) -> Self {
        match err {
            GitError::Network(msg) => codefleet_core::Error::Network(msg),
            GitError::Locked(msg) => codefleet_core::Error::Lock(msg),
            GitError::MissingWorkingCopy(uri) => {
                codefleet_core::Error::NotFound(format!("working copy for {uri}"))
            }
            other => codefleet_core::Error::ExecutionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_network_failure() {
        let err = GitError::from_stderr(
            "clone",
            "fatal: unable to access 'https://example.invalid/a.git/': Could not resolve host: example.invalid",
        );
        assert!(matches!(err, GitError::Network(_)));
        assert!(codefleet_core::Error::from(err).is_transient());
    }

    #[test]
    fn test_classify_lock_contention() {
        let err = GitError::from_stderr(
            "fetch",
            "fatal: Unable to create '/data/repo/.git/index.lock': File exists.",
        );
        assert!(matches!(err, GitError::Locked(_)));
    }

    #[test]
    fn test_classify_permanent_failure() {
        let err = GitError::from_stderr("clone", "fatal: repository 'x' does not exist");
        assert!(matches!(err, GitError::CommandFailed { .. }));
        assert!(!codefleet_core::Error::from(err).is_transient());
    }
}
