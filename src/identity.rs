use crate::env::{env_opt, HOSTNAME_ENV, LOG_HOSTNAME_ENV};
use tracing::warn;

/// Host, process and deployment facts stamped on every record.
///
/// Resolved once when the writer is built and never re-read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub hostname: String,
    pub pid: u32,
    pub environment: Option<String>,
}

impl Identity {
    pub fn new(hostname: impl Into<String>, pid: u32, environment: Option<String>) -> Self {
        Identity {
            hostname: hostname.into(),
            pid,
            environment,
        }
    }

    /// Identity of the running process.
    pub fn detect(environment: Option<String>) -> Self {
        Identity::new(get_hostname(), std::process::id(), environment)
    }
}

/// Resolve the hostname from `ELASTIC_LOG_HOSTNAME`, then `HOSTNAME`, then
/// the system, falling back to `"unknown"`.
pub fn get_hostname() -> String {
    if let Some(hostname) = env_opt(LOG_HOSTNAME_ENV).or_else(|| env_opt(HOSTNAME_ENV)) {
        return hostname;
    }

    #[cfg(unix)]
    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("failed to read system hostname: {}", e),
    }

    #[cfg(windows)]
    if let Some(hostname) = env_opt("COMPUTERNAME") {
        return hostname;
    }

    warn!("could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_current_process() {
        let identity = Identity::detect(Some("test".to_string()));
        assert_eq!(identity.pid, std::process::id());
        assert!(!identity.hostname.is_empty());
        assert_eq!(identity.environment.as_deref(), Some("test"));
    }
}
