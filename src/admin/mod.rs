// SPDX-License-Identifier: Apache-2.0

//! Admin HTTP endpoint for pushing configuration remotely.
//!
//! A posted document is validated in full before anything is written; only
//! a valid document replaces the configuration file on disk. The rewrite is
//! then picked up by the reload orchestrator through the same file-watch
//! path as a manual edit, so remote and local updates converge on one code
//! path.

use crate::config::Config;
use crate::listener::Listener;

use http::Method;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;

use std::error::Error as StdError;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{error, info, warn};

/// ConfigServer accepts replacement configurations over HTTP.
pub struct ConfigServer {
    config_path: PathBuf,
}

impl ConfigServer {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Serves requests on `listener` until cancelled.
    pub async fn serve(
        &self,
        listener: Listener,
        cancellation: CancellationToken,
    ) -> Result<(), Box<dyn StdError + Send + Sync>> {
        let svc = ConfigService::new(self.config_path.clone());

        // To bridge Tower->Hyper we must wrap the tower service
        let svc = TowerToHyperService::new(svc);

        let timer = hyper_util::rt::TokioTimer::new();
        let graceful = hyper_util::server::graceful::GracefulShutdown::new();

        let mut builder = Builder::new(TokioExecutor::new());
        builder.http1().timer(timer.clone());
        builder.http2().timer(timer);

        let listener = listener.into_async()?;
        loop {
            let stream = tokio::select! {
                r = listener.accept() => {
                    match r {
                        Ok((stream, _)) => stream,
                        Err(e) => return Err(e.into()),
                    }
                },
                _ = cancellation.cancelled() => break
            };

            let io = TokioIo::new(stream);

            let conn = builder.serve_connection(io, svc.clone());
            let fut = graceful.watch(conn.into_owned());

            tokio::spawn(async move {
                let _ = fut.await.map_err(|e| {
                    error!("error serving config connection: {:?}", e);
                });
            });
        }

        // gracefully shutdown existing connections
        graceful.shutdown().await;

        Ok(())
    }
}

#[derive(Clone)]
struct ConfigService {
    config_path: PathBuf,
}

impl ConfigService {
    fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    // Infallible for a static body and a valid status
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

impl<H> Service<Request<H>> for ConfigService
where
    H: Body + Send + Sync + 'static,
    <H as Body>::Data: Send + Sync,
    <H as Body>::Error: std::fmt::Debug + Send + Sync,
{
    type Response = Response<Full<Bytes>>;
    type Error = hyper::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<H>) -> Self::Future {
        if req.uri().path() != "/push_config" {
            return Box::pin(futures::future::ok(text_response(
                StatusCode::NOT_FOUND,
                "Not Found",
            )));
        }

        if req.method() != Method::POST {
            return Box::pin(futures::future::ok(text_response(
                StatusCode::OK,
                "Only support POST json",
            )));
        }

        let config_path = self.config_path.clone();
        Box::pin(async move {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = ?e, "failed to read push_config body");
                    return Ok(text_response(
                        StatusCode::BAD_REQUEST,
                        "cannot decode body",
                    ));
                }
            };

            if let Err(e) = Config::from_slice(&body) {
                warn!(error = %e, "rejected pushed configuration");
                let msg = if body.is_empty() || serde_json::from_slice::<serde_json::Value>(&body).is_err() {
                    "cannot decode body"
                } else {
                    "config is wrong"
                };
                return Ok(text_response(StatusCode::BAD_REQUEST, msg));
            }

            if let Err(e) = tokio::fs::write(&config_path, &body).await {
                error!(error = %e, path = %config_path.display(), "failed to write configuration");
                return Ok(text_response(StatusCode::BAD_REQUEST, "write file error"));
            }

            info!(bytes = body.len(), "accepted pushed configuration");
            Ok(text_response(StatusCode::OK, "success"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use hyper_util::client::legacy::connect::HttpConnector;
    use hyper_util::client::legacy::Client;
    use hyper_util::rt::TokioTimer;
    use std::fs;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn valid_config(watch_dir: &std::path::Path) -> String {
        format!(
            r#"{{
                "metric": "log.console", "timer": 10, "host": "web01",
                "agent": "http://127.0.0.1:1988/v1/push",
                "files": [{{
                    "path": "{}",
                    "filepattern": ".*\\.log",
                    "keywords": [{{"exp": "ERROR", "tag": "err", "type": "count"}}]
                }}]
            }}"#,
            watch_dir.display()
        )
    }

    fn client() -> Client<HttpConnector, Full<Bytes>> {
        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(2))
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(HttpConnector::new())
    }

    async fn start_server(config_path: PathBuf) -> (SocketAddr, CancellationToken) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = Listener::listen_async(addr).await.unwrap();
        let bound = listener.bound_address().unwrap();

        let cancellation = CancellationToken::new();
        let cancel = cancellation.clone();
        tokio::spawn(async move {
            ConfigServer::new(config_path)
                .serve(listener, cancellation)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        (bound, cancel)
    }

    async fn post(
        addr: SocketAddr,
        body: &str,
    ) -> (StatusCode, String) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/push_config", addr))
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap();
        let resp = timeout(Duration::from_secs(5), client().request(req))
            .await
            .expect("request timed out")
            .expect("request failed");
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_push_valid_config_rewrites_file() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        fs::write(&cfg_path, valid_config(logs.path())).unwrap();

        let (addr, cancel) = start_server(cfg_path.clone()).await;

        let doc = valid_config(logs.path()).replace("\"timer\": 10", "\"timer\": 30");
        let (status, body) = post(addr, &doc).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "success");

        let written = fs::read_to_string(&cfg_path).unwrap();
        assert!(written.contains("\"timer\": 30"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_push_rejects_bad_payloads() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        let original = valid_config(logs.path());
        fs::write(&cfg_path, &original).unwrap();

        let (addr, cancel) = start_server(cfg_path.clone()).await;

        let (status, body) = post(addr, "{ not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "cannot decode body");

        // Well-formed JSON that fails validation (zero timer)
        let doc = original.replace("\"timer\": 10", "\"timer\": 0");
        let (status, body) = post(addr, &doc).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "config is wrong");

        // File untouched by either rejection
        assert_eq!(fs::read_to_string(&cfg_path).unwrap(), original);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_non_post_and_unknown_paths() {
        let logs = TempDir::new().unwrap();
        let cfg_dir = TempDir::new().unwrap();
        let cfg_path = cfg_dir.path().join("cfg.json");
        fs::write(&cfg_path, valid_config(logs.path())).unwrap();

        let (addr, cancel) = start_server(cfg_path).await;

        let resp = client()
            .get(format!("http://{}/push_config", addr).parse().unwrap())
            .await
            .unwrap();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"Only support POST json");

        let resp = client()
            .get(format!("http://{}/other", addr).parse().unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        cancel.cancel();
    }
}
