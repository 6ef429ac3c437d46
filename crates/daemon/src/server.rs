//! Listener, per-connection pump and the snapshot rebuild loop.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use cache::CachedModule;
use protocol::{Module, Session};
use repository::RepositoryError;

use crate::Config;

/// Socket read size for the connection pump.
const READ_BUFFER: usize = 4096;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Compress(#[from] cache::CompressError),

    #[error("listener error: {0}")]
    Io(#[from] io::Error),

    #[error("no modules found under {0}")]
    NoModules(String),
}

/// A bound daemon: snapshots built, watcher armed, listener open.
pub struct Server {
    listener: TcpListener,
    modules: Vec<Arc<CachedModule>>,
    _watcher: repository::Watcher,
}

impl Server {
    /// Discovers modules under the configured root, builds their first
    /// snapshots, starts the rebuild loop and binds the listener.
    ///
    /// Building before binding means no client ever sees a half-filled
    /// cache.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let names = repository::discover_modules(&config.root)?;
        if names.is_empty() {
            return Err(ServerError::NoModules(config.root.display().to_string()));
        }

        let mut modules = Vec::with_capacity(names.len());
        for name in names {
            let module = Arc::new(CachedModule::new(name.clone(), config.description.clone()));
            rebuild_one(&config.root, &module);
            modules.push(module);
        }

        let (ticks_tx, ticks_rx) = crossbeam_channel::bounded::<()>(1);
        let watcher =
            repository::watch(&config.root, Duration::from_millis(config.debounce_ms), ticks_tx)?;
        {
            let root = config.root.clone();
            let modules = modules.clone();
            thread::Builder::new().name("rebuild".into()).spawn(move || {
                for () in &ticks_rx {
                    for module in &modules {
                        rebuild_one(&root, module);
                    }
                }
            })?;
        }

        let listener = TcpListener::bind((config.address, config.port))?;
        info!(address = %listener.local_addr()?, modules = modules.len(), "listening");
        Ok(Self { listener, modules, _watcher: watcher })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; one thread per connection.
    pub fn serve(self) -> Result<(), ServerError> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let modules: Vec<Arc<dyn Module>> =
                        self.modules.iter().map(|m| Arc::clone(m) as Arc<dyn Module>).collect();
                    thread::Builder::new().name("session".into()).spawn(move || {
                        if let Err(error) = handle_connection(stream, modules) {
                            debug!(%error, "connection dropped");
                        }
                    })?;
                }
                Err(error) => warn!(%error, "accept failed"),
            }
        }
        Ok(())
    }
}

/// Builds (or rebuilds) one module's snapshot from disk, logging instead of
/// failing so a transient filesystem state never kills the daemon.
fn rebuild_one(root: &Path, module: &Arc<CachedModule>) {
    let result = repository::load_tree(root, module.name())
        .map_err(ServerError::from)
        .and_then(|tree| module.rebuild(&tree).map_err(ServerError::from));
    if let Err(error) = result {
        warn!(module = module.name(), %error, "snapshot rebuild failed");
    }
}

/// Pumps one connection: flush queued output, read, feed the session,
/// repeat until the session finishes or the peer goes away.
fn handle_connection(mut stream: TcpStream, modules: Vec<Arc<dyn Module>>) -> io::Result<()> {
    let peer = stream.peer_addr()?;
    debug!(%peer, "connection open");

    let seed = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as i32);
    let mut session = Session::new(modules, seed);
    let mut buffer = [0u8; READ_BUFFER];

    loop {
        if session.has_output() {
            stream.write_all(&session.take_output())?;
        }
        if session.finished() {
            break;
        }
        let n = stream.read(&mut buffer)?;
        if n == 0 {
            debug!(%peer, "peer closed mid-session");
            break;
        }
        if let Err(error) = session.receive(&buffer[..n]) {
            warn!(%peer, module = session.module_name().unwrap_or("-"), %error, "session error");
        }
    }

    debug!(%peer, module = session.module_name().unwrap_or("-"), "connection closed");
    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}

/// Binds per the configuration and serves until the process is killed.
pub fn run(config: &Config) -> Result<(), ServerError> {
    Server::bind(config)?.serve()
}
