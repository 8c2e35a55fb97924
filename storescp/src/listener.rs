//! The transport listener of the storage service provider.
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dicom_archive_store::{ArchiveLayout, InstanceStore};
use dicom_archive_ul::association::negotiation::AcceptorOptions;
use dicom_archive_ul::association::Error as AssociationError;
use dicom_archive_ul::ProviderAssociation;
use snafu::{Backtrace, Report, ResultExt, Snafu};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{ConfigError, ScpConfig};
use crate::dispatcher::{self, DispatchError};
use crate::service::{ArchiveService, ServiceHandler};

/// Errors which prevent the listener from running.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ListenerError {
    #[snafu(display("Invalid configuration"))]
    InvalidConfig {
        #[snafu(backtrace)]
        source: ConfigError,
    },

    #[snafu(display("Could not open instance store"))]
    OpenStore {
        #[snafu(backtrace)]
        source: dicom_archive_store::Error,
    },

    #[snafu(display("Could not listen on {}", addr))]
    Bind {
        addr: SocketAddr,
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not accept connections"))]
    Accept {
        source: io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Listener task failed"))]
    ListenerTask {
        source: tokio::task::JoinError,
        backtrace: Backtrace,
    },
}

/// The storage service provider.
#[derive(Debug)]
pub struct StorageScp;

impl StorageScp {
    /// Start listening for associations,
    /// storing incoming instances in the archive at the configured root.
    pub async fn start(config: ScpConfig) -> Result<ScpHandle, ListenerError> {
        config.validate().context(InvalidConfigSnafu)?;
        let store = InstanceStore::open(&ArchiveLayout::new(&config.archive_root))
            .context(OpenStoreSnafu)?;
        Self::start_with_handler(config, Arc::new(ArchiveService::new(store))).await
    }

    /// Start listening for associations,
    /// serving requests with the given handler.
    pub async fn start_with_handler(
        config: ScpConfig,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<ScpHandle, ListenerError> {
        config.validate().context(InvalidConfigSnafu)?;
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .context(BindSnafu { addr })?;
        let local_addr = listener.local_addr().context(BindSnafu { addr })?;
        info!("{} listening on: tcp://{}", config.ae_title, local_addr);

        let stop = CancellationToken::new();
        let abort = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(config.acceptor_options()),
            handler,
            stop.clone(),
            abort.clone(),
            Arc::clone(&active),
        ));

        Ok(ScpHandle {
            local_addr,
            stop,
            abort,
            active,
            task,
            finished: false,
        })
    }
}

/// A handle to a running storage service provider.
#[derive(Debug)]
pub struct ScpHandle {
    local_addr: SocketAddr,
    stop: CancellationToken,
    abort: CancellationToken,
    active: Arc<AtomicUsize>,
    task: JoinHandle<Result<(), ListenerError>>,
    finished: bool,
}

impl ScpHandle {
    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The number of associations currently being served.
    pub fn active_associations(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop accepting connections and shut down gracefully.
    ///
    /// Associations waiting for their next command are released.
    /// Those still running when `deadline` elapses are aborted.
    pub async fn stop(mut self, deadline: Duration) -> Result<(), ListenerError> {
        info!("Stopping storage service provider");
        self.stop.cancel();
        if self.finished {
            return Ok(());
        }
        match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(result) => result.context(ListenerTaskSnafu)?,
            Err(_) => {
                warn!(
                    "Aborting {} association(s) still active after {:?}",
                    self.active_associations(),
                    deadline
                );
                self.abort.cancel();
                self.task.await.context(ListenerTaskSnafu)?
            }
        }
    }

    /// Wait for the listener to end,
    /// which only happens on its own if it fails.
    ///
    /// Cancel safe.
    pub async fn wait(&mut self) -> Result<(), ListenerError> {
        if self.finished {
            return Ok(());
        }
        let result = (&mut self.task).await;
        self.finished = true;
        result.context(ListenerTaskSnafu)?
    }
}

/// Decrements the active association counter when dropped.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: Arc<AcceptorOptions>,
    handler: Arc<dyn ServiceHandler>,
    stop: CancellationToken,
    abort: CancellationToken,
    active: Arc<AtomicUsize>,
) -> Result<(), ListenerError> {
    let mut associations = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            _ = stop.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let span = info_span!("association", peer = %peer);
                    let guard = ActiveGuard::new(&active);
                    associations.spawn(
                        handle_connection(
                            socket,
                            Arc::clone(&options),
                            Arc::clone(&handler),
                            stop.child_token(),
                            guard,
                        )
                        .instrument(span),
                    );
                }
                Err(e) if is_transient(&e) => {
                    warn!("Failed to accept incoming connection: {}", e);
                }
                Err(e) => {
                    error!("Listener failed: {}", e);
                    break Err(e).context(AcceptSnafu);
                }
            },
            Some(joined) = associations.join_next(), if !associations.is_empty() => {
                if let Err(e) = joined {
                    warn!("Association task failed: {}", e);
                }
            }
        }
    };
    drop(listener);

    if outcome.is_err() {
        associations.abort_all();
    }
    loop {
        tokio::select! {
            _ = abort.cancelled() => {
                associations.abort_all();
                while associations.join_next().await.is_some() {}
                break;
            }
            joined = associations.join_next() => match joined {
                None => break,
                Some(Err(e)) if !e.is_cancelled() => warn!("Association task failed: {}", e),
                Some(_) => {}
            }
        }
    }
    debug!("All associations ended");
    outcome
}

/// Accept errors which concern a single connection attempt.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn handle_connection(
    socket: TcpStream,
    options: Arc<AcceptorOptions>,
    handler: Arc<dyn ServiceHandler>,
    stop: CancellationToken,
    _guard: ActiveGuard,
) {
    debug!("Accepted incoming connection");
    let association = match ProviderAssociation::accept(socket, &options).await {
        Ok(association) => association,
        Err(AssociationError::Rejected { association_rj, .. }) => {
            info!("Rejected association: {}", association_rj.source);
            return;
        }
        Err(e) => {
            warn!("Could not establish association: {}", Report::from_error(e));
            return;
        }
    };

    let calling_ae_title = association.calling_ae_title().to_string();
    match dispatcher::serve(association, handler, stop).await {
        Ok(()) => info!("Association with {} ended", calling_ae_title),
        Err(DispatchError::Association { source, .. }) if source.is_protocol_violation() => {
            warn!(
                "Aborted association with {}: {}",
                calling_ae_title,
                Report::from_error(source)
            );
        }
        Err(e) => warn!(
            "Association with {} failed: {}",
            calling_ae_title,
            Report::from_error(e)
        ),
    }
}
