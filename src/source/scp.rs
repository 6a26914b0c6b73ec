//! Secure-copy fetch of counter snapshot files.
//!
//! Arrays expose their I/O statistics as files in an on-box dump directory,
//! reachable only over SSH. `fetch` copies every matching file from that
//! directory into the run's working directory. It never mutates remote
//! state.
//!
//! An idle array may have produced nothing since the last run, and some
//! firmware removes the dump directory outright between collection windows.
//! A missing remote path is therefore an empty result, not a failure. Any
//! other transport or authentication problem is fatal: staging and transform
//! must not run without data.

use glob;
use ssh2;
use std::error;
use std::fmt;
use std::fs;
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

// Blocking libssh2 operations inherit this deadline.
const SESSION_TIMEOUT_MS: u32 = 120_000;

// SFTP status codes for an absent remote path, per the protocol draft:
// SSH_FX_NO_SUCH_FILE and SSH_FX_NO_SUCH_PATH.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// Connection and selection parameters for the fetch step.
#[derive(Debug, Clone)]
pub struct ScpConfig {
    /// Account to authenticate as on the array.
    pub user: String,
    /// SSH port on the array.
    pub port: u16,
    /// Path to the private key used for pubkey authentication.
    pub key: PathBuf,
    /// The on-box directory holding counter snapshot files.
    pub remote_path: PathBuf,
    /// Glob pattern selecting snapshot files by name within `remote_path`.
    pub file_pattern: String,
}

impl Default for ScpConfig {
    fn default() -> ScpConfig {
        ScpConfig {
            user: "monitor".to_string(),
            port: 22,
            key: PathBuf::from("/etc/volstat/id_rsa"),
            remote_path: PathBuf::from("/dumps/iostats"),
            file_pattern: "Nv_stats_*".to_string(),
        }
    }
}

/// The ways a fetch can fail. All of them are fatal to the run except the
/// absent-remote-path case, which `fetch` converts into an empty result
/// before an error is ever surfaced.
#[derive(Debug)]
pub enum FetchError {
    /// The configured file pattern is not a valid glob.
    BadPattern(glob::PatternError),
    /// TCP connect or local file I/O failed.
    Io(io::Error),
    /// SSH handshake, authentication or SFTP transfer failed.
    Ssh(ssh2::Error),
    /// The session completed but the server rejected the credentials.
    Auth(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            FetchError::BadPattern(ref e) => {
                write!(f, "invalid snapshot file pattern: {}", e)
            }
            FetchError::Io(ref e) => write!(f, "transfer I/O failure: {}", e),
            FetchError::Ssh(ref e) => write!(f, "ssh failure: {}", e),
            FetchError::Auth(ref user) => {
                write!(f, "authentication as {:?} was rejected", user)
            }
        }
    }
}

impl error::Error for FetchError {}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> FetchError {
        FetchError::Io(e)
    }
}

impl From<ssh2::Error> for FetchError {
    fn from(e: ssh2::Error) -> FetchError {
        FetchError::Ssh(e)
    }
}

/// Copy every matching snapshot file from the array into `workdir`.
///
/// Host keys are accepted on first use; the deployment model trusts the
/// network path to the array, not a curated known-hosts file. Returns the
/// local paths of the fetched files, empty when the remote directory does
/// not exist or matches nothing.
pub fn fetch(
    address: &str,
    config: &ScpConfig,
    workdir: &Path,
) -> Result<Vec<PathBuf>, FetchError> {
    let pattern = glob::Pattern::new(&config.file_pattern)
        .map_err(FetchError::BadPattern)?;

    let tcp = TcpStream::connect((address, config.port))?;
    let mut sess = ssh2::Session::new()?;
    sess.set_timeout(SESSION_TIMEOUT_MS);
    sess.set_tcp_stream(tcp);
    sess.handshake()?;
    sess.userauth_pubkey_file(&config.user, None, &config.key, None)?;
    if !sess.authenticated() {
        return Err(FetchError::Auth(config.user.clone()));
    }
    debug!("authenticated to {} as {}", address, config.user);

    let sftp = sess.sftp()?;
    let entries = match sftp.readdir(&config.remote_path) {
        Ok(entries) => entries,
        Err(e) => {
            if path_absent(&e) {
                info!(
                    "remote path {:?} absent on {}, nothing to fetch",
                    config.remote_path, address
                );
                return Ok(Vec::new());
            }
            return Err(FetchError::Ssh(e));
        }
    };

    let mut fetched = Vec::new();
    for (remote, stat) in entries {
        if !stat.is_file() {
            continue;
        }
        let name = match remote.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        if !pattern.matches(&name) {
            continue;
        }
        let local = workdir.join(&name);
        let mut src = sftp.open(&remote)?;
        let mut dst = fs::File::create(&local)?;
        let bytes = io::copy(&mut src, &mut dst)?;
        trace!("fetched {:?}, {} bytes", name, bytes);
        fetched.push(local);
    }
    info!(
        "fetched {} snapshot files from {}:{:?}",
        fetched.len(),
        address,
        config.remote_path
    );
    Ok(fetched)
}

fn path_absent(e: &ssh2::Error) -> bool {
    match e.code() {
        ssh2::ErrorCode::SFTP(code) => {
            code == SFTP_NO_SUCH_FILE || code == SFTP_NO_SUCH_PATH
        }
        _ => false,
    }
}
