//! Resolution of the host identity used to name the node.
//!
//! The default source runs one synchronous host command and trims its output.
//! [`EnvOverride`] lets operators pin the identity through the environment
//! while keeping the host lookup as the fallback path.

use std::env;
use std::io;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

const IDENTITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::identity");

/// Environment variable consulted by [`EnvOverride::node_name`].
pub const NODE_NAME_ENV_VAR: &str = "VK_NODE_NAME";

/// Source of the identity string that names this node.
pub trait IdentitySource {
    /// Resolves the identity, failing when the host cannot provide one.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the lookup cannot run or yields nothing.
    fn resolve(&self) -> Result<String, IdentityError>;
}

/// Errors surfaced while resolving the host identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The lookup command could not be started.
    #[error("failed to run identity lookup '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The lookup command exited unsuccessfully.
    #[error("identity lookup '{program}' exited with {status}: {stderr}")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Rendered exit status.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },
    /// The lookup produced output that was not valid UTF-8.
    #[error("identity lookup '{program}' produced non UTF-8 output")]
    InvalidUtf8 {
        /// Program whose output was rejected.
        program: String,
    },
    /// The lookup succeeded but produced an empty identity.
    #[error("identity lookup '{program}' produced an empty identity")]
    Empty {
        /// Program whose output was empty.
        program: String,
    },
}

/// Identity source backed by a host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
}

impl HostCommand {
    /// Builds a source that runs `program` with `args`.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The platform's local host name lookup.
    #[cfg(target_os = "macos")]
    #[must_use]
    pub fn local_host_name() -> Self {
        Self::new("scutil", ["--get", "LocalHostName"])
    }

    /// The platform's local host name lookup.
    #[cfg(not(target_os = "macos"))]
    #[must_use]
    pub fn local_host_name() -> Self {
        Self::new("hostname", std::iter::empty::<String>())
    }

    /// Program executed by this source.
    #[must_use]
    pub const fn program(&self) -> &str {
        self.program.as_str()
    }
}

impl IdentitySource for HostCommand {
    fn resolve(&self) -> Result<String, IdentityError> {
        debug!(
            target: IDENTITY_TARGET,
            program = %self.program,
            args = ?self.args,
            "resolving host identity"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|source| IdentityError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(IdentityError::NonZeroExit {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let stdout = String::from_utf8(output.stdout).map_err(|_| IdentityError::InvalidUtf8 {
            program: self.program.clone(),
        })?;
        let identity = stdout.trim();
        if identity.is_empty() {
            return Err(IdentityError::Empty {
                program: self.program.clone(),
            });
        }
        Ok(identity.to_owned())
    }
}

/// Identity source preferring an environment variable over a fallback source.
#[derive(Debug, Clone)]
pub struct EnvOverride<F> {
    variable: String,
    fallback: F,
}

impl<F> EnvOverride<F> {
    /// Consults `variable` first and delegates to `fallback` when it is unset
    /// or blank.
    #[must_use]
    pub fn new(variable: impl Into<String>, fallback: F) -> Self {
        Self {
            variable: variable.into(),
            fallback,
        }
    }

    /// Override keyed by [`NODE_NAME_ENV_VAR`].
    #[must_use]
    pub fn node_name(fallback: F) -> Self {
        Self::new(NODE_NAME_ENV_VAR, fallback)
    }
}

impl<F> IdentitySource for EnvOverride<F>
where
    F: IdentitySource,
{
    fn resolve(&self) -> Result<String, IdentityError> {
        match env::var(&self.variable) {
            Ok(value) if !value.trim().is_empty() => {
                debug!(
                    target: IDENTITY_TARGET,
                    variable = %self.variable,
                    "identity taken from environment"
                );
                Ok(value.trim().to_owned())
            }
            _ => self.fallback.resolve(),
        }
    }
}

/// Identity source returning a fixed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    /// Wraps a fixed identity.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }
}

impl IdentitySource for StaticIdentity {
    fn resolve(&self) -> Result<String, IdentityError> {
        Ok(self.0.clone())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn host_command_trims_output() {
        let source = HostCommand::new("printf", ["  node-a \n"]);
        assert_eq!(source.resolve().expect("lookup succeeds"), "node-a");
    }

    #[rstest]
    fn host_command_rejects_non_zero_exit() {
        let source = HostCommand::new("false", std::iter::empty::<String>());
        let error = source.resolve().expect_err("lookup should fail");
        assert!(matches!(error, IdentityError::NonZeroExit { .. }));
    }

    #[rstest]
    fn host_command_rejects_missing_program() {
        let source = HostCommand::new(
            "definitely-not-a-real-identity-program",
            std::iter::empty::<String>(),
        );
        let error = source.resolve().expect_err("spawn should fail");
        assert!(matches!(error, IdentityError::Spawn { .. }));
    }

    #[rstest]
    fn host_command_rejects_blank_output() {
        let source = HostCommand::new("printf", ["   \n"]);
        let error = source.resolve().expect_err("blank identity should fail");
        assert!(matches!(error, IdentityError::Empty { .. }));
    }

    #[rstest]
    fn env_override_falls_back_when_unset() {
        let source = EnvOverride::new(
            "VK_NODE_NAME_TEST_VARIABLE_THAT_IS_NEVER_SET",
            StaticIdentity::new("fallback-node"),
        );
        assert_eq!(source.resolve().expect("fallback resolves"), "fallback-node");
    }
}
