//! Remote command execution: the session abstraction, a bounded pool of
//! reusable sessions, an OpenSSH implementation and the interactive
//! connection setup loop.

pub mod openssh;
pub mod pool;
pub mod setup;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of a remote connection attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown or changed host key (fingerprint {hash})")]
    UnknownHostKey { hash: String },

    #[error("Credential rejected by the remote host")]
    RejectedCredential,
}

/// Where and as whom to connect. `credential` is transport specific (an
/// identity file path for OpenSSH).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoginDetails {
    pub host: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub credential: String,
    pub port: u16,
}

impl LoginDetails {
    pub fn new(host: &str, user: &str, credential: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            credential: credential.to_string(),
            port,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// One remote execution channel.
pub trait RemoteSession: Send {
    fn connect(&mut self, login: &LoginDetails) -> Result<(), ConnectionError>;

    fn is_connected(&self) -> bool;

    fn execute(
        &mut self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ConnectionError>;

    /// Records the host key with the given fingerprint as trusted.
    fn trust_host(&mut self, login: &LoginDetails, hash: &str) -> Result<(), ConnectionError>;

    fn disconnect(&mut self);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Shared script for [`MockSession`]s: queued connect results and a
    /// handler producing command output.
    #[derive(Default)]
    pub(crate) struct MockRemote {
        pub connect_results: Mutex<VecDeque<Result<(), ConnectionError>>>,
        pub trusted: Mutex<Vec<String>>,
        pub logins: Mutex<Vec<LoginDetails>>,
        pub commands: Mutex<Vec<(String, Option<String>)>>,
        pub stdout: Mutex<String>,
    }

    pub(crate) struct MockSession {
        pub remote: Arc<MockRemote>,
        pub connected: bool,
    }

    impl MockSession {
        pub(crate) fn new(remote: &Arc<MockRemote>) -> Self {
            Self {
                remote: Arc::clone(remote),
                connected: false,
            }
        }
    }

    impl RemoteSession for MockSession {
        fn connect(&mut self, login: &LoginDetails) -> Result<(), ConnectionError> {
            self.remote.logins.lock().push(login.clone());
            let result = self
                .remote
                .connect_results
                .lock()
                .pop_front()
                .unwrap_or(Ok(()));
            self.connected = result.is_ok();
            result
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn execute(
            &mut self,
            command: &str,
            stdin: Option<&str>,
        ) -> Result<CommandOutput, ConnectionError> {
            self.remote
                .commands
                .lock()
                .push((command.to_string(), stdin.map(str::to_string)));
            Ok(CommandOutput {
                status: 0,
                stdout: self.remote.stdout.lock().clone(),
                stderr: String::new(),
            })
        }

        fn trust_host(&mut self, _login: &LoginDetails, hash: &str) -> Result<(), ConnectionError> {
            self.remote.trusted.lock().push(hash.to_string());
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    #[test]
    fn login_destination_combines_user_and_host() {
        let login = LoginDetails::new("cluster.example.org", "alice", "", 22);
        assert_eq!(login.destination(), "alice@cluster.example.org");
    }

    #[test]
    fn credential_is_never_serialized() {
        let login = LoginDetails::new("h", "u", "/home/u/.ssh/id_secret", 2222);
        let text = toml::to_string(&login).unwrap();
        assert!(!text.contains("id_secret"));
        let back: LoginDetails = toml::from_str(&text).unwrap();
        assert_eq!(back.credential, "");
        assert_eq!(back.port, 2222);
    }
}
