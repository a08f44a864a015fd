use crate::error::LookupError;
use log::debug;
use std::process::Command;

/// Value recorded when no user could be identified
pub const UNKNOWN_USER: &str = "?";

/// Resolves which user held a local address at a given time
#[cfg_attr(test, mockall::automock)]
pub trait UserLookup {
    fn lookup(&self, timestamp: &str, address: &str, port: &str) -> Result<String, LookupError>;
}

/// Lookup used when no identity service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUserLookup;

impl UserLookup for NoUserLookup {
    fn lookup(&self, _timestamp: &str, _address: &str, _port: &str) -> Result<String, LookupError> {
        Ok(UNKNOWN_USER.to_string())
    }
}

/// Runs an external command as `<program> <args..> <timestamp> <address> <port>`
/// and takes its trimmed stdout as the user
#[derive(Debug, Clone)]
pub struct CommandUserLookup {
    program: String,
    args: Vec<String>,
}

impl CommandUserLookup {
    /// Build from a command line; `None` when `command` is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl UserLookup for CommandUserLookup {
    fn lookup(&self, timestamp: &str, address: &str, port: &str) -> Result<String, LookupError> {
        debug!(
            "Attempting usersearch with info: {} {} {}",
            timestamp, address, port
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .args([timestamp, address, port])
            .output()?;

        if !output.status.success() {
            return Err(LookupError::CommandFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if user.is_empty() {
            return Err(LookupError::CommandFailed(format!(
                "{} returned no user",
                self.program
            )));
        }
        Ok(user)
    }
}
