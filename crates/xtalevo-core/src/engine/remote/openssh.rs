use super::{CommandOutput, ConnectionError, LoginDetails, RemoteSession};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use tracing::{debug, trace};

/// Exit status `ssh` uses for its own (non-remote) failures.
const SSH_ERROR_STATUS: i32 = 255;

/// A session backed by the system `ssh` client.
///
/// Each session keeps a multiplexed master connection (`ControlMaster`) open
/// so that commands reuse one authenticated channel. The credential of the
/// login is used as an identity file path when non-empty. Host keys are
/// checked strictly against `known_hosts`.
pub struct OpenSshSession {
    control_path: PathBuf,
    known_hosts: Option<PathBuf>,
    login: Option<LoginDetails>,
    connected: bool,
}

impl OpenSshSession {
    /// `control_dir` holds the control socket; `slot` keeps sockets of
    /// sessions in the same pool apart.
    pub fn new(control_dir: PathBuf, slot: usize, known_hosts: Option<PathBuf>) -> Self {
        Self {
            control_path: control_dir.join(format!("xtalevo-{}-{slot}.sock", std::process::id())),
            known_hosts,
            login: None,
            connected: false,
        }
    }

    fn base_command(&self, login: &LoginDetails) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(login.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=yes"])
            .args(["-o", "ControlMaster=auto"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(["-o", "ControlPersist=600"]);
        if let Some(known_hosts) = &self.known_hosts {
            cmd.arg("-o")
                .arg(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        if !login.credential.is_empty() {
            cmd.arg("-i").arg(&login.credential);
        }
        cmd.arg(login.destination());
        cmd
    }

    fn run(
        &self,
        login: &LoginDetails,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ConnectionError> {
        let mut cmd = self.base_command(login);
        cmd.arg(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        trace!(host = %login.host, command, "Running remote command.");

        let child = cmd
            .spawn()
            .map_err(|e| ConnectionError::Transport(format!("cannot run ssh: {e}")))?;
        let output = feed_and_collect(child, stdin)?;

        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if result.status == SSH_ERROR_STATUS {
            return Err(classify_failure(&result.stderr, || host_key_fingerprint(login)));
        }
        Ok(result)
    }
}

/// Writes `input` to the child's stdin on a separate thread while its output
/// is collected, so neither side blocks on a full pipe.
fn feed_and_collect(mut child: Child, input: Option<&str>) -> Result<Output, ConnectionError> {
    let pipe = child.stdin.take();
    let (output, written) = thread::scope(|scope| {
        let writer = scope.spawn(move || match (input, pipe) {
            (Some(input), Some(mut pipe)) => pipe.write_all(input.as_bytes()),
            _ => Ok(()),
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("stdin writer panicked")));
        (output, written)
    });
    let output =
        output.map_err(|e| ConnectionError::Transport(format!("ssh did not finish: {e}")))?;
    match written {
        // The command stopped reading; its exit status tells the rest.
        Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(ConnectionError::Transport(format!(
            "cannot write stdin: {e}"
        ))),
        _ => Ok(output),
    }
}

impl RemoteSession for OpenSshSession {
    fn connect(&mut self, login: &LoginDetails) -> Result<(), ConnectionError> {
        self.connected = false;
        self.run(login, "true", None)?;
        debug!(host = %login.host, "SSH session established.");
        self.login = Some(login.clone());
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn execute(
        &mut self,
        command: &str,
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ConnectionError> {
        let login = self
            .login
            .clone()
            .ok_or_else(|| ConnectionError::Transport("session is not connected".to_string()))?;
        self.run(&login, command, stdin)
    }

    fn trust_host(&mut self, login: &LoginDetails, hash: &str) -> Result<(), ConnectionError> {
        let keys = scan_host_keys(login)?;
        let fingerprint = fingerprint_of(&keys).unwrap_or_default();
        if fingerprint != hash {
            return Err(ConnectionError::UnknownHostKey { hash: fingerprint });
        }
        let path = match &self.known_hosts {
            Some(path) => path.clone(),
            None => default_known_hosts()?,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConnectionError::Transport(format!("{}: {e}", path.display())))?;
        file.write_all(keys.as_bytes())
            .map_err(|e| ConnectionError::Transport(format!("{}: {e}", path.display())))?;
        debug!(host = %login.host, hash, "Host key added to known hosts.");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(login) = self.login.take() {
            let mut cmd = Command::new("ssh");
            cmd.arg("-o")
                .arg(format!("ControlPath={}", self.control_path.display()))
                .args(["-O", "exit"])
                .arg(login.destination())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            // Best effort: the master may already be gone.
            let _ = cmd.status();
        }
        self.connected = false;
    }
}

impl Drop for OpenSshSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Maps `ssh` diagnostics onto the connection error taxonomy. `fingerprint`
/// is only evaluated for host key failures.
pub fn classify_failure(stderr: &str, fingerprint: impl FnOnce() -> String) -> ConnectionError {
    if stderr.contains("Host key verification failed")
        || stderr.contains("REMOTE HOST IDENTIFICATION HAS CHANGED")
        || stderr.contains("No ED25519 host key is known")
        || stderr.contains("host key for")
    {
        ConnectionError::UnknownHostKey {
            hash: fingerprint(),
        }
    } else if stderr.contains("Permission denied") || stderr.contains("Too many authentication failures")
    {
        ConnectionError::RejectedCredential
    } else {
        let message = stderr.trim();
        ConnectionError::Transport(if message.is_empty() {
            "ssh exited with status 255".to_string()
        } else {
            message.to_string()
        })
    }
}

fn scan_host_keys(login: &LoginDetails) -> Result<String, ConnectionError> {
    let output = Command::new("ssh-keyscan")
        .arg("-p")
        .arg(login.port.to_string())
        .arg(&login.host)
        .stderr(Stdio::null())
        .output()
        .map_err(|e| ConnectionError::Transport(format!("cannot run ssh-keyscan: {e}")))?;
    let keys = String::from_utf8_lossy(&output.stdout).into_owned();
    if keys.trim().is_empty() {
        return Err(ConnectionError::Transport(format!(
            "no host keys reported by {}",
            login.host
        )));
    }
    Ok(keys)
}

/// SHA256 fingerprint of the first key in `keys` (known_hosts format).
fn fingerprint_of(keys: &str) -> Option<String> {
    let mut child = Command::new("ssh-keygen")
        .args(["-l", "-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    child.stdin.take()?.write_all(keys.as_bytes()).ok()?;
    let output = child.wait_with_output().ok()?;
    parse_fingerprint(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts `SHA256:...` from `ssh-keygen -l` output.
fn parse_fingerprint(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .next()
        .map(str::to_string)
}

fn host_key_fingerprint(login: &LoginDetails) -> String {
    scan_host_keys(login)
        .ok()
        .and_then(|keys| fingerprint_of(&keys))
        .unwrap_or_else(|| "unknown".to_string())
}

fn default_known_hosts() -> Result<PathBuf, ConnectionError> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
        .ok_or_else(|| ConnectionError::Transport("HOME is not set".to_string()))
}
