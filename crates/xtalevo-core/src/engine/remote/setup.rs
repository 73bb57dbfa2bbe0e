use super::pool::ConnectionPool;
use super::{ConnectionError, LoginDetails, RemoteSession};
use crate::engine::decision::DecisionProvider;
use crate::engine::error::EngineError;
use tracing::{info, instrument, warn};

/// How a failed connection affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// A new session cannot work without connections: failure aborts.
    Start,
    /// A resumed session can still be inspected: failure degrades to read-only.
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Connected,
    ReadOnly,
}

/// Something whose remote connections can be established interactively.
pub trait Connector: Send + Sync {
    fn establish(
        &self,
        login: &mut LoginDetails,
        decisions: &dyn DecisionProvider,
        mode: ConnectionMode,
    ) -> Result<ConnectionOutcome, EngineError>;
}

impl<S: RemoteSession> Connector for ConnectionPool<S> {
    fn establish(
        &self,
        login: &mut LoginDetails,
        decisions: &dyn DecisionProvider,
        mode: ConnectionMode,
    ) -> Result<ConnectionOutcome, EngineError> {
        establish_connections(self, login, decisions, mode)
    }
}

/// Connects every pooled session, asking `decisions` how to proceed on
/// recoverable failures.
///
/// An untrusted host key asks whether to trust it; a rejected credential
/// asks for a new one (which replaces `login.credential`). Transport errors
/// and declined decisions end the loop according to `mode`.
#[instrument(skip_all, name = "establish_connections", fields(host = %login.host))]
pub fn establish_connections<S: RemoteSession>(
    pool: &ConnectionPool<S>,
    login: &mut LoginDetails,
    decisions: &dyn DecisionProvider,
    mode: ConnectionMode,
) -> Result<ConnectionOutcome, EngineError> {
    loop {
        let error = match pool.configure(login) {
            Ok(()) => {
                info!("Connected to {}.", login.destination());
                return Ok(ConnectionOutcome::Connected);
            }
            Err(e) => e,
        };

        match &error {
            ConnectionError::Transport(_) => return give_up(mode, error, false),
            ConnectionError::UnknownHostKey { hash } => {
                let question = format!(
                    "The host key of {} (fingerprint {hash}) is not trusted. Trust it and continue?",
                    login.host
                );
                if !decisions.need_boolean(&question) {
                    return give_up(mode, error, true);
                }
                if let Err(e) = pool.validate_server_key(login, hash) {
                    return give_up(mode, e, false);
                }
            }
            ConnectionError::RejectedCredential => {
                let prompt = format!(
                    "Authentication as {} failed. Enter a new credential:",
                    login.destination()
                );
                match decisions.need_password(&prompt) {
                    Some(credential) => login.credential = credential,
                    None => return give_up(mode, error, true),
                }
            }
        }
    }
}

fn give_up(
    mode: ConnectionMode,
    error: ConnectionError,
    declined: bool,
) -> Result<ConnectionOutcome, EngineError> {
    match mode {
        ConnectionMode::Resume => {
            warn!(error = %error, "Continuing in read-only mode without remote connections.");
            Ok(ConnectionOutcome::ReadOnly)
        }
        ConnectionMode::Start if declined => Err(EngineError::Aborted(format!(
            "connection setup declined: {error}"
        ))),
        ConnectionMode::Start => Err(error.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{MockRemote, MockSession};
    use super::*;
    use crate::engine::decision::tests::ScriptedDecisions;
    use std::sync::Arc;

    fn setup(results: Vec<Result<(), ConnectionError>>) -> (ConnectionPool<MockSession>, Arc<MockRemote>) {
        let remote = Arc::new(MockRemote::default());
        remote.connect_results.lock().extend(results);
        let pool = ConnectionPool::new(2, || MockSession::new(&remote));
        (pool, remote)
    }

    fn login() -> LoginDetails {
        LoginDetails::new("cluster", "alice", "old-key", 22)
    }

    #[test]
    fn successful_configure_connects_without_questions() {
        let (pool, _) = setup(vec![]);
        let decisions = ScriptedDecisions::new(&[], &[]);
        let mut login = login();
        let outcome =
            establish_connections(&pool, &mut login, &decisions, ConnectionMode::Start).unwrap();
        assert_eq!(outcome, ConnectionOutcome::Connected);
        assert!(decisions.asked.lock().is_empty());
    }

    #[test]
    fn trusted_host_key_is_recorded_and_connection_retried() {
        let (pool, remote) = setup(vec![Err(ConnectionError::UnknownHostKey {
            hash: "SHA256:k".into(),
        })]);
        let decisions = ScriptedDecisions::new(&[true], &[]);
        let mut login = login();
        let outcome =
            establish_connections(&pool, &mut login, &decisions, ConnectionMode::Start).unwrap();
        assert_eq!(outcome, ConnectionOutcome::Connected);
        assert_eq!(remote.trusted.lock().as_slice(), ["SHA256:k"]);
        assert!(decisions.asked.lock()[0].contains("SHA256:k"));
    }

    #[test]
    fn new_credential_replaces_rejected_one() {
        let (pool, remote) = setup(vec![Err(ConnectionError::RejectedCredential)]);
        let decisions = ScriptedDecisions::new(&[], &[Some("new-key")]);
        let mut login = login();
        establish_connections(&pool, &mut login, &decisions, ConnectionMode::Start).unwrap();
        assert_eq!(login.credential, "new-key");
        assert_eq!(remote.logins.lock().last().unwrap().credential, "new-key");
    }

    #[test]
    fn declined_host_key_aborts_a_new_session() {
        let (pool, _) = setup(vec![Err(ConnectionError::UnknownHostKey {
            hash: "SHA256:k".into(),
        })]);
        let decisions = ScriptedDecisions::new(&[false], &[]);
        let mut login = login();
        let err = establish_connections(&pool, &mut login, &decisions, ConnectionMode::Start)
            .unwrap_err();
        assert!(matches!(err, EngineError::Aborted(_)));
    }

    #[test]
    fn transport_error_aborts_start_but_degrades_resume() {
        let failure = || Err(ConnectionError::Transport("refused".into()));
        let (pool, _) = setup(vec![failure()]);
        let decisions = ScriptedDecisions::new(&[], &[]);
        let err = establish_connections(&pool, &mut login(), &decisions, ConnectionMode::Start)
            .unwrap_err();
        assert!(matches!(err, EngineError::Connection { .. }));

        let (pool, _) = setup(vec![failure()]);
        let outcome =
            establish_connections(&pool, &mut login(), &decisions, ConnectionMode::Resume)
                .unwrap();
        assert_eq!(outcome, ConnectionOutcome::ReadOnly);
    }

    #[test]
    fn declined_password_degrades_resume_to_read_only() {
        let (pool, _) = setup(vec![Err(ConnectionError::RejectedCredential)]);
        let decisions = ScriptedDecisions::new(&[], &[None]);
        let outcome =
            establish_connections(&pool, &mut login(), &decisions, ConnectionMode::Resume)
                .unwrap();
        assert_eq!(outcome, ConnectionOutcome::ReadOnly);
    }
}
