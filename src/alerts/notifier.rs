use crate::error::NotifyError;
use log::{debug, error, info};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

/// Delivery channel for formatted alerts
#[cfg_attr(test, mockall::automock)]
pub trait Notifier {
    fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError>;
}

/// Sends alerts through a `mail`-compatible command
///
/// For each recipient the body is written to the stdin of
/// `<command> -s <subject> <recipient>`.
#[derive(Debug, Clone)]
pub struct MailNotifier {
    command: String,
}

impl MailNotifier {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn send_one(&self, subject: &str, body: &str, recipient: &str) -> Result<(), NotifyError> {
        let mut child = Command::new(&self.command)
            .arg("-s")
            .arg(subject)
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                NotifyError::NotificationFailed(format!("Failed to execute {}: {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // The exit status decides success; a transport that exits early
            // without reading its input closes the pipe on us
            if let Err(e) = stdin.write_all(body.as_bytes()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(NotifyError::IoError(e));
                }
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NotifyError::NotificationFailed(format!(
                "{} failed for {} with status {}: {}",
                self.command,
                recipient,
                output.status,
                stderr.trim()
            )));
        }

        debug!("Sent email to rcpt: {}", recipient);
        Ok(())
    }
}

impl Notifier for MailNotifier {
    fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for recipient in recipients {
            if let Err(e) = self.send_one(subject, body, recipient) {
                error!("Failed to send notification to {}: {}", recipient, e);
                failures.push(recipient.as_str());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::NotificationFailed(format!(
                "delivery failed for {} of {} recipients: {}",
                failures.len(),
                recipients.len(),
                failures.join(", ")
            )))
        }
    }
}

/// Logs what would have been sent instead of sending it
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunNotifier;

impl Notifier for DryRunNotifier {
    fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
        for recipient in recipients {
            info!(
                "Rcpt {} would have received the following email:\nSubject: {}\n{}",
                recipient, subject, body
            );
        }
        Ok(())
    }
}
