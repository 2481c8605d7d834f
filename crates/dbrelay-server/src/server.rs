//! HTTP listeners.
//!
//! One plain listener, plus an optional TLS listener sharing the same
//! state. On SIGINT the server stops accepting connections and waits for
//! in-flight dispatches to give back their limiter permits.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::http::{self, AppState};

pub async fn run(
    addr: SocketAddr,
    tls: Option<(SocketAddr, TlsAcceptor)>,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(addr).await?;
    info!(
        "listening on http://{addr} (concurrency {})",
        state.concurrency
    );

    let tls_task = match tls {
        Some((tls_addr, acceptor)) => {
            let tls_listener = TcpListener::bind(tls_addr).await?;
            info!("listening on https://{tls_addr}");
            Some(tokio::spawn(accept_tls(
                tls_listener,
                acceptor,
                Arc::clone(&state),
            )))
        }
        None => None,
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received, draining dispatches...");
                break;
            }

            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!("connection from {peer}");
                    serve(stream, Arc::clone(&state));
                }
                Err(e) => warn!("accept error: {e}"),
            },
        }
    }

    if let Some(task) = tls_task {
        task.abort();
    }

    // every running dispatch holds at least one permit
    let _ = state.limiter.acquire_many(state.concurrency as u32).await;
    info!("all dispatches drained, shutting down");

    Ok(())
}

async fn accept_tls(listener: TcpListener, acceptor: TlsAcceptor, state: Arc<AppState>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("tls accept error: {e}");
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => serve(tls_stream, state),
                Err(e) => debug!("tls handshake with {peer} failed: {e}"),
            }
        });
    }
}

/// Serves HTTP/1 on an accepted stream in its own task.
fn serve<S>(stream: S, state: Arc<AppState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |req| http::handle(req, Arc::clone(&state)));

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            // client gone mid-request
            debug!("http connection error: {e}");
        }
    });
}
