//! Probes driving a real engine: a failing endpoint aborts live attempts,
//! a healthy one lets the work unit run to completion.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff_engine::{Backoff, BackoffConfig, BackoffError, BoxFuture, CancellationToken};
use backoff_health::{HttpProbe, HttpProbeConfig, TcpProbe, TcpProbeConfig, ThresholdConfig, threshold_checker};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn serve_status(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let svc = service_fn(move |_req: Request<Incoming>| async move {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::from_static(b"state")))
                            .unwrap(),
                    )
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });
    addr
}

fn polling(success_threshold: u32, failure_threshold: u32) -> ThresholdConfig {
    ThresholdConfig {
        check_interval: Duration::from_millis(10),
        initial_delay: Duration::ZERO,
        success_threshold,
        failure_threshold,
    }
}

fn engine_config() -> BackoffConfig {
    BackoffConfig {
        initial_duration: Duration::from_millis(10),
        max_duration: Duration::from_millis(50),
        max_retry: 1,
        ..BackoffConfig::default()
    }
}

/// Work unit that only ends when its attempt is cancelled.
fn hang_until_cancelled(
    attempts: Arc<AtomicU32>,
) -> impl Fn(CancellationToken) -> BoxFuture<anyhow::Result<()>> + Send + Sync + 'static {
    move |token: CancellationToken| -> BoxFuture<anyhow::Result<()>> {
        attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            token.cancelled().await;
            Err::<(), _>(anyhow::anyhow!("stopped by health check"))
        })
    }
}

#[tokio::test]
async fn failing_http_endpoint_aborts_attempts() {
    let addr = serve_status(503).await;
    let probe = HttpProbe::new(HttpProbeConfig::new(
        format!("http://{addr}/healthz").parse().unwrap(),
    ))
    .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let engine = Backoff::new(
        hang_until_cancelled(attempts.clone()),
        engine_config().with_health_checker(threshold_checker(probe, polling(1, 2))),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), engine.run(CancellationToken::new()))
        .await
        .expect("unhealthy program must be stopped");
    assert!(matches!(result, Err(BackoffError::MaxRetryExceeded { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn closed_tcp_port_aborts_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = TcpProbeConfig::new(addr.to_string());
    config.timeout = Some(Duration::from_millis(200));

    let attempts = Arc::new(AtomicU32::new(0));
    let engine = Backoff::new(
        hang_until_cancelled(attempts.clone()),
        engine_config().with_health_checker(threshold_checker(TcpProbe::new(config), polling(1, 1))),
    );

    let result = tokio::time::timeout(Duration::from_secs(5), engine.run(CancellationToken::new()))
        .await
        .expect("unhealthy program must be stopped");
    assert!(matches!(result, Err(BackoffError::MaxRetryExceeded { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn healthy_endpoint_leaves_attempt_running() {
    let addr = serve_status(200).await;
    let probe = HttpProbe::new(HttpProbeConfig::new(
        format!("http://{addr}/healthz").parse().unwrap(),
    ))
    .unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();
    let engine = Backoff::new(
        move |_token: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                // Long enough for several probes to pass.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            }
        },
        engine_config().with_health_checker(threshold_checker(probe, polling(2, 2))),
    );

    engine.run(CancellationToken::new()).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
