use super::{BackendError, JobBackend, JobHandle, JobState, JobStore};
use crate::core::io::listing::Listing;
use crate::core::models::structure::StructureEntity;
use crate::engine::remote::openssh::OpenSshSession;
use crate::engine::remote::pool::ConnectionPool;
use crate::engine::remote::setup::Connector;
use crate::engine::remote::{LoginDetails, RemoteSession};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, instrument, warn};

pub const BACKEND_ID: &str = "remote-command";

fn default_port() -> u16 {
    22
}

fn default_connections() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RemoteCommandConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity file handed to the transport.
    #[serde(default)]
    pub identity: Option<PathBuf>,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
    /// Size of the connection pool.
    #[serde(default = "default_connections")]
    pub connections: usize,
    /// Command run remotely with the structure listing on stdin. It prints a
    /// listing with `enthalpy`/`energy` records (and optionally the
    /// optimized geometry) on stdout.
    pub command: String,
}

impl RemoteCommandConfig {
    pub fn login(&self) -> LoginDetails {
        let credential = self
            .identity
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        LoginDetails::new(&self.host, &self.user, &credential, self.port)
    }
}

/// Backend running one remote command per job over a pooled connection.
pub struct RemoteCommandBackend<S: RemoteSession> {
    config: RemoteCommandConfig,
    pool: ConnectionPool<S>,
    jobs: JobStore,
}

impl<S: RemoteSession> RemoteCommandBackend<S> {
    pub fn new(config: RemoteCommandConfig, pool: ConnectionPool<S>) -> Self {
        Self {
            config,
            pool,
            jobs: JobStore::default(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<S> {
        &self.pool
    }
}

impl RemoteCommandBackend<OpenSshSession> {
    /// Pool of OpenSSH sessions keeping their control sockets in `control_dir`.
    pub fn with_openssh(config: RemoteCommandConfig, control_dir: PathBuf) -> Self {
        let known_hosts = config.known_hosts.clone();
        let mut slot = 0;
        let pool = ConnectionPool::new(config.connections, || {
            slot += 1;
            OpenSshSession::new(control_dir.clone(), slot, known_hosts.clone())
        });
        Self::new(config, pool)
    }
}

impl<S: RemoteSession + 'static> JobBackend for RemoteCommandBackend<S> {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn connector(&self) -> Option<&dyn Connector> {
        Some(&self.pool)
    }

    fn login(&self) -> Option<LoginDetails> {
        Some(self.config.login())
    }

    #[instrument(skip_all, name = "remote_job")]
    fn submit(&self, entity: &StructureEntity) -> Result<JobHandle, BackendError> {
        let (input, tag) = {
            let s = entity.read();
            (Listing::from_structure(&s).to_text(), s.tag())
        };
        let output = {
            let mut lease = self.pool.acquire();
            debug!(%tag, slot = lease.slot(), "Running remote job.");
            lease.session.execute(&self.config.command, Some(&input))?
        };

        let state = if output.success() {
            JobState::Finished
        } else {
            let reason = format!("exit status {}: {}", output.status, output.stderr.trim());
            warn!(%tag, %reason, "Remote job failed.");
            JobState::Failed(reason)
        };
        Ok(self.jobs.record(entity, state, output.stdout))
    }

    fn status(&self, handle: &JobHandle) -> Result<JobState, BackendError> {
        self.jobs.state(handle)
    }

    fn fetch(&self, entity: &StructureEntity, handle: &JobHandle) -> Result<bool, BackendError> {
        self.jobs.fetch(entity, handle)
    }

    fn discard(&self, handle: &JobHandle) {
        self.jobs.discard(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::lattice::Lattice;
    use crate::core::models::structure::Structure;
    use crate::engine::remote::tests::{MockRemote, MockSession};
    use nalgebra::Vector3;
    use std::sync::Arc;

    fn config() -> RemoteCommandConfig {
        RemoteCommandConfig {
            host: "cluster".into(),
            user: "alice".into(),
            port: 2222,
            identity: Some(PathBuf::from("/home/alice/.ssh/id_search")),
            known_hosts: None,
            connections: 2,
            command: "relax-structure".into(),
        }
    }

    fn backend(remote: &Arc<MockRemote>) -> RemoteCommandBackend<MockSession> {
        RemoteCommandBackend::new(config(), ConnectionPool::new(2, || MockSession::new(remote)))
    }

    fn entity() -> StructureEntity {
        let mut s = Structure::new(Lattice::cubic(4.0));
        s.add_atom("A", Vector3::new(0.25, 0.25, 0.25));
        StructureEntity::new(s)
    }

    #[test]
    fn login_uses_identity_as_credential() {
        let login = config().login();
        assert_eq!(login.destination(), "alice@cluster");
        assert_eq!(login.port, 2222);
        assert_eq!(login.credential, "/home/alice/.ssh/id_search");
    }

    #[test]
    fn job_sends_listing_and_reads_results_from_stdout() {
        let remote = Arc::new(MockRemote::default());
        *remote.stdout.lock() = "iteration 1\nenergy -3.5\nenthalpy -3.0\n".into();
        let backend = backend(&remote);
        let target = entity();

        let handle = backend.submit(&target).unwrap();
        assert_eq!(backend.status(&handle).unwrap(), JobState::Finished);
        assert!(backend.fetch(&target, &handle).unwrap());
        assert_eq!(target.read().enthalpy, Some(-3.0));
        assert_eq!(target.read().energy, Some(-3.5));

        let commands = remote.commands.lock();
        assert_eq!(commands[0].0, "relax-structure");
        let input = commands[0].1.as_deref().unwrap();
        assert!(input.starts_with("cell 4.0"));
        assert!(input.contains("atom A 0.25"));
        assert_eq!(backend.pool().in_use(), 0);
        assert!(backend.requires_remote());
    }

    #[test]
    fn output_without_results_is_not_usable() {
        let remote = Arc::new(MockRemote::default());
        *remote.stdout.lock() = "nothing to see\n".into();
        let backend = backend(&remote);
        let target = entity();
        let handle = backend.submit(&target).unwrap();
        assert!(!backend.fetch(&target, &handle).unwrap());
        assert_eq!(target.read().enthalpy, None);
    }
}
