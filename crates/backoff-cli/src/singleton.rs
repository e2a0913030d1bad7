//! Single running instance per name.
//!
//! On unix the instance listens on a socket at `$TMPDIR/<name>` and speaks
//! HTTP/1 over it. A newcomer sends `GET /exit`; the holder answers `ok`
//! and shuts its supervisor down, then the newcomer binds the socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backoff_engine::{BoxFuture, Gate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bound on taking over the name, exit request included.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period for the previous holder after it acknowledged.
const HANDOVER_DELAY: Duration = Duration::from_secs(1);

pub struct Singleton {
    name: String,
    path: PathBuf,
    /// Cancelled when another instance asks this one to exit.
    quit: CancellationToken,
    /// Stops the exit server.
    server: CancellationToken,
    bound: AtomicBool,
}

impl Singleton {
    pub fn new(name: impl Into<String>, quit: CancellationToken) -> Self {
        let name = name.into();
        let path = std::env::temp_dir().join(&name);
        Self::with_path(name, path, quit)
    }

    pub fn with_path(name: impl Into<String>, path: impl Into<PathBuf>, quit: CancellationToken) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            quit,
            server: CancellationToken::new(),
            bound: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gate that takes over the name before the first successful attempt.
    pub fn gate(self: Arc<Self>) -> Gate {
        Arc::new(move || -> BoxFuture<anyhow::Result<()>> {
            let singleton = self.clone();
            Box::pin(async move { singleton.acquire().await })
        })
    }

    /// Ask the current holder to exit, then listen on the socket.
    #[cfg(unix)]
    pub async fn acquire(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        tokio::time::timeout(ACQUIRE_TIMEOUT, self.take_over())
            .await
            .with_context(|| format!("taking over singleton {} timed out", self.name))?
    }

    #[cfg(not(unix))]
    pub async fn acquire(&self) -> anyhow::Result<()> {
        anyhow::bail!("singleton mode is only supported on unix")
    }

    /// Stop serving and remove the socket.
    ///
    /// After an exit request the socket is left for the newcomer.
    pub fn shutdown(&self) {
        self.server.cancel();
        if self.bound.swap(false, Ordering::SeqCst) && !self.quit.is_cancelled() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "singleton socket removed"),
                Err(e) => debug!(error = %e, "removing singleton socket failed"),
            }
        }
    }

    #[cfg(unix)]
    async fn take_over(&self) -> anyhow::Result<()> {
        use anyhow::Context;
        use tokio::net::UnixListener;

        match unix::request_exit(&self.path).await {
            Ok(()) => {
                info!(name = %self.name, "previous instance acknowledged exit");
                tokio::time::sleep(HANDOVER_DELAY).await;
            }
            Err(e) => debug!(error = %e, "no previous instance to stop"),
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove stale socket {}", self.path.display()))?;
        }

        let listener = UnixListener::bind(&self.path)
            .with_context(|| format!("failed to listen on {}", self.path.display()))?;
        self.bound.store(true, Ordering::SeqCst);
        info!(path = %self.path.display(), "singleton listening");

        tokio::spawn(unix::serve(listener, self.server.clone(), self.quit.clone()));
        Ok(())
    }
}

impl Drop for Singleton {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(unix)]
mod unix {
    use std::convert::Infallible;
    use std::path::Path;

    use anyhow::bail;
    use bytes::Bytes;
    use http::{Request, Response, StatusCode, header};
    use http_body_util::{BodyExt, Empty, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use tokio::net::{UnixListener, UnixStream};
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, error, info};

    /// `GET /exit` against whoever holds `path`.
    pub(super) async fn request_exit(path: &Path) -> anyhow::Result<()> {
        let stream = UnixStream::connect(path).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "exit request connection closed");
            }
        });

        let request = Request::get("/exit")
            .header(header::HOST, "backoff")
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        let body = response.into_body().collect().await?.to_bytes();
        if body.as_ref() != b"ok" {
            bail!("unexpected exit response {:?}", String::from_utf8_lossy(&body));
        }
        Ok(())
    }

    pub(super) async fn serve(listener: UnixListener, shutdown: CancellationToken, quit: CancellationToken) {
        loop {
            let stream = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(error = %e, "singleton accept failed");
                        quit.cancel();
                        break;
                    }
                },
            };

            let quit = quit.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req: Request<Incoming>| {
                    let response = route(&req, &quit);
                    async move { Ok::<_, Infallible>(response) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await
                {
                    debug!(error = %e, "singleton connection error");
                }
            });
        }
        debug!("singleton server stopped");
    }

    fn route(req: &Request<Incoming>, quit: &CancellationToken) -> Response<Full<Bytes>> {
        match req.uri().path() {
            "/exit" => {
                info!("exit requested by another instance");
                quit.cancel();
                Response::new(Full::new(Bytes::from_static(b"ok")))
            }
            _ => {
                let mut response = Response::new(Full::new(Bytes::new()));
                *response.status_mut() = StatusCode::NOT_FOUND;
                response
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn singleton_in(dir: &Path, quit: CancellationToken) -> Singleton {
        Singleton::with_path("backoff-test", dir.join("backoff-test"), quit)
    }

    #[tokio::test]
    async fn first_instance_binds_without_delay() {
        let dir = tempfile::tempdir().unwrap();
        let singleton = singleton_in(dir.path(), CancellationToken::new());

        let started = std::time::Instant::now();
        singleton.acquire().await.unwrap();
        assert!(started.elapsed() < HANDOVER_DELAY);
        assert!(singleton.path().exists());

        singleton.shutdown();
        assert!(!singleton.path().exists());
    }

    #[tokio::test]
    async fn newcomer_stops_previous_holder() {
        let dir = tempfile::tempdir().unwrap();
        let first_quit = CancellationToken::new();
        let first = singleton_in(dir.path(), first_quit.clone());
        first.acquire().await.unwrap();

        let second_quit = CancellationToken::new();
        let second = singleton_in(dir.path(), second_quit.clone());
        second.acquire().await.unwrap();

        assert!(first_quit.is_cancelled());
        assert!(!second_quit.is_cancelled());

        // The old holder must not remove the new holder's socket.
        first.shutdown();
        assert!(second.path().exists());
        unix::request_exit(second.path()).await.unwrap();
        assert!(second_quit.is_cancelled());
    }

    #[tokio::test]
    async fn stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("backoff-test"), b"stale").unwrap();

        let singleton = singleton_in(dir.path(), CancellationToken::new());
        singleton.acquire().await.unwrap();
        assert!(unix::request_exit(singleton.path()).await.is_ok());
    }

    #[tokio::test]
    async fn gate_acquires() {
        let dir = tempfile::tempdir().unwrap();
        let singleton = Arc::new(singleton_in(dir.path(), CancellationToken::new()));

        let gate = singleton.clone().gate();
        gate().await.unwrap();
        assert!(singleton.path().exists());
    }
}
