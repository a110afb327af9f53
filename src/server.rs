//! HTTP server and shutdown coordination.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──shutdown()──► ShuttingDown ──► Stopped
//! ```
//!
//! The first call to [`ServerHandle::shutdown`] (or the first SIGINT /
//! SIGTERM) does, in order:
//!
//! 1. stop `listener.accept()` and drop the listener;
//! 2. log the stop event;
//! 3. run the `on_shutdown` callback, if one was registered;
//! 4. exit the process with status 0, unless `graceful_shutdown` is set.
//!
//! Every later call is a no-op: the transition out of `Running` happens
//! exactly once, guarded by a compare-exchange.
//!
//! In-flight requests are **not** drained. Connection tasks already running
//! keep going until the runtime shuts down, but nothing waits for them.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::App;
use crate::error::Error;

type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// The HTTP server, before it starts listening.
pub struct Server<A> {
    addr: A,
    on_shutdown: Option<ShutdownHook>,
    signals: bool,
}

impl Server<String> {
    /// Listens on all interfaces at `port`.
    pub fn port(port: u16) -> Self {
        Server::bind(format!("0.0.0.0:{port}"))
    }
}

impl<A: ToSocketAddrs> Server<A> {
    /// Configures the server to bind to `addr` when it starts. Anything
    /// tokio can resolve works: `"0.0.0.0:8080"`, `("localhost", 0)`, a
    /// `SocketAddr`.
    pub fn bind(addr: A) -> Self {
        Self { addr, on_shutdown: None, signals: true }
    }

    /// Registers the callback run once during shutdown, after the listener
    /// has closed. A later call replaces an earlier one.
    pub fn on_shutdown(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Do not install SIGINT / SIGTERM handlers; shutdown then only happens
    /// through [`ServerHandle::shutdown`]. Useful when embedding the server
    /// or running several in one test process.
    pub fn without_signals(mut self) -> Self {
        self.signals = false;
        self
    }

    /// Binds the listener and starts accepting connections in the
    /// background. Returns as soon as the listener is bound.
    pub async fn start(self, app: App) -> Result<ServerHandle, Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        let exit_process = !app.config().graceful_shutdown;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);

        let acceptor = tokio::spawn(accept_loop(listener, Arc::new(app), stop_rx));

        let handle = ServerHandle {
            inner: Arc::new(Lifecycle {
                state: AtomicU8::new(RUNNING),
                local_addr,
                stop_accepting: stop_tx,
                acceptor: Mutex::new(Some(acceptor)),
                on_shutdown: Mutex::new(self.on_shutdown),
                done: done_tx,
                exit_process,
            }),
        };

        info!(addr = %local_addr, started_at = crate::app::unix_millis(), "typed-bridge listening");

        if self.signals {
            // Registered before `start` returns so a signal that arrives
            // before the task below is first polled is still caught.
            let signals = Signals::install();
            let handle = handle.clone();
            tokio::spawn(async move {
                signals.recv().await;
                info!("shutdown signal received");
                handle.shutdown().await;
            });
        }

        Ok(handle)
    }

    /// [`start`](Server::start)s the server and returns once it has stopped.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let handle = self.start(app).await?;
        handle.stopped().await;
        Ok(())
    }
}

// ── ServerHandle ──────────────────────────────────────────────────────────────

/// Where a server is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Running,
    ShuttingDown,
    Stopped,
}

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

/// Handle to a running server. Cheap to clone; all clones control the same
/// server. Once every handle is dropped the listener closes.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<Lifecycle>,
}

struct Lifecycle {
    state: AtomicU8,
    local_addr: SocketAddr,
    stop_accepting: watch::Sender<bool>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
    on_shutdown: Mutex<Option<ShutdownHook>>,
    done: watch::Sender<bool>,
    exit_process: bool,
}

impl ServerHandle {
    /// Address the listener is bound to. Resolves port `0` to the port the
    /// OS picked.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn state(&self) -> State {
        match self.inner.state.load(Ordering::Acquire) {
            RUNNING => State::Running,
            SHUTTING_DOWN => State::ShuttingDown,
            _ => State::Stopped,
        }
    }

    /// Stops the server. Runs at most once; later calls return immediately.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        inner.stop_accepting.send_replace(true);
        let acceptor = inner.acceptor.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(acceptor) = acceptor {
            if let Err(e) = acceptor.await {
                error!("accept loop ended abnormally: {e}");
            }
        }

        info!(addr = %inner.local_addr, stopped_at = crate::app::unix_millis(), "typed-bridge stopped");

        let hook = inner.on_shutdown.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(hook) = hook {
            hook();
        }

        inner.state.store(STOPPED, Ordering::Release);
        inner.done.send_replace(true);

        if inner.exit_process {
            std::process::exit(0);
        }
    }

    /// Resolves once the server has reached [`State::Stopped`].
    pub async fn stopped(&self) {
        let mut done = self.inner.done.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = done.wait_for(|stopped| *stopped).await;
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(listener: TcpListener, app: Arc<App>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            // Check the stop flag first so a shutdown never races one more
            // accepted connection.
            biased;

            _ = stop.changed() => break,

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    // Called once per request on the connection.
                    let svc = service_fn(move |req: hyper::Request<Incoming>| {
                        let app = Arc::clone(&app);
                        async move {
                            Ok::<_, std::convert::Infallible>(app.handle(req, remote_addr).await)
                        }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }
        }
    }
    // `listener` drops here: the port stops accepting.
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// SIGINT / SIGTERM listeners (Ctrl-C only on non-Unix).
///
/// On Unix the handlers are registered in [`Signals::install`], not on first
/// poll. If one cannot be installed the error is logged and that signal is
/// simply never observed. Once installed, tokio keeps the handlers for the
/// life of the process, so signals after the first are absorbed.
struct Signals {
    #[cfg(unix)]
    interrupt: Option<tokio::signal::unix::Signal>,
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl Signals {
    fn install() -> Self {
        use tokio::signal::unix::SignalKind;
        Self {
            interrupt: listen(SignalKind::interrupt(), "SIGINT"),
            terminate: listen(SignalKind::terminate(), "SIGTERM"),
        }
    }

    /// Resolves on the first signal.
    async fn recv(self) {
        let Self { mut interrupt, mut terminate } = self;
        tokio::select! {
            () = next(interrupt.as_mut()) => {}
            () = next(terminate.as_mut()) => {}
        }
    }
}

#[cfg(not(unix))]
impl Signals {
    fn install() -> Self {
        Self {}
    }

    async fn recv(self) {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
fn listen(kind: tokio::signal::unix::SignalKind, name: &str) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            error!("failed to install {name} handler: {e}");
            None
        }
    }
}

#[cfg(unix)]
async fn next(signal: Option<&mut tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}
