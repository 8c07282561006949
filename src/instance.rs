use anyhow::{bail, Context, Result};
use std::{
    fs, io,
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

const SOCKET_NAME: &str = "vaultlink.sock";
const MAX_PAYLOAD: u64 = 4 * 1024;

pub fn socket_path() -> PathBuf {
    std::env::temp_dir().join(SOCKET_NAME)
}

/// Hands `payload` to an already running instance. False when none answers.
pub fn forward(payload: &str) -> bool {
    forward_to(&socket_path(), payload)
}

#[cfg(unix)]
pub fn forward_to(path: &Path, payload: &str) -> bool {
    let mut stream = match UnixStream::connect(path) {
        Ok(stream) => stream,
        Err(_) => return false,
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return true;
    }
    match stream.write_all(payload.as_bytes()) {
        Ok(()) => {
            info!(socket = ?path, "forwarded link to running instance");
            true
        }
        Err(err) => {
            warn!(socket = ?path, error = %err, "failed to forward link");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn forward_to(_path: &Path, _payload: &str) -> bool {
    false
}

/// Listens for links from later invocations. Each payload arrives on the
/// receiver returned by `bind`; the socket file goes away on drop.
pub struct InstanceServer {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl InstanceServer {
    pub fn bind() -> Result<(Self, Receiver<String>)> {
        Self::bind_at(socket_path())
    }

    #[cfg(unix)]
    pub fn bind_at(path: PathBuf) -> Result<(Self, Receiver<String>)> {
        if UnixStream::connect(&path).is_ok() {
            bail!("another instance is already listening on {path:?}");
        }
        match fs::remove_file(&path) {
            Ok(()) => debug!(socket = ?path, "removed stale socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err).context("remove stale socket"),
        }
        let listener = UnixListener::bind(&path).context("bind instance socket")?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let flag = Arc::clone(&shutdown);
        thread::Builder::new()
            .name("instance-listener".to_string())
            .spawn(move || accept_loop(listener, tx, flag))
            .context("spawn instance listener")?;
        info!(socket = ?path, "listening for forwarded links");
        Ok((Self { path, shutdown }, rx))
    }

    #[cfg(not(unix))]
    pub fn bind_at(_path: PathBuf) -> Result<(Self, Receiver<String>)> {
        bail!("single-instance forwarding needs unix sockets")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        #[cfg(unix)]
        let _ = UnixStream::connect(&self.path);
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn accept_loop(listener: UnixListener, tx: Sender<String>, shutdown: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "instance socket accept failed");
                continue;
            }
        };
        match read_payload(stream) {
            Ok(Some(payload)) => {
                if tx.send(payload).is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "failed to read forwarded link"),
        }
    }
    debug!("instance listener stopped");
}

#[cfg(unix)]
fn read_payload(stream: UnixStream) -> io::Result<Option<String>> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut raw = Vec::new();
    stream.take(MAX_PAYLOAD).read_to_end(&mut raw)?;
    let payload = String::from_utf8_lossy(&raw).trim().to_string();
    Ok((!payload.is_empty()).then_some(payload))
}
