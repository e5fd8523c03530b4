//! HTTP listener for the update front door
//!
//! Plain HTTP/1.1; TLS is expected to be terminated in front of the relay.
//! Each request is reduced to (path, query, Authorization) and answered with
//! whatever [`FrontDoor::handle`] returns.

use ddns_relay_core::FrontDoor;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept connections until `shutdown` flips to true
///
/// Connections already accepted finish on their own tasks.
pub async fn serve(
    listener: TcpListener,
    front_door: Arc<FrontDoor>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Update front door listening on {}", addr);
    }

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let front_door = front_door.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request| {
                let front_door = front_door.clone();
                async move { Ok::<_, Infallible>(respond(&front_door, request).await) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }

    info!("Update front door stopped");
}

async fn respond(front_door: &FrontDoor, request: Request<Incoming>) -> Response<Full<Bytes>> {
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let answer = front_door
        .handle(request.uri().path(), request.uri().query(), authorization)
        .await;

    let mut response = Response::new(Full::new(Bytes::from(answer.body)));
    *response.status_mut() =
        StatusCode::from_u16(answer.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddns_relay_core::config::{Credential, NameConfig};
    use ddns_relay_core::traits::DurableStore;
    use ddns_relay_core::{MemoryStore, PendingUpdateSet, RecordType};
    use std::collections::BTreeMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start() -> (std::net::SocketAddr, PendingUpdateSet, watch::Sender<bool>) {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let pending = PendingUpdateSet::new(store, 8);
        let name = NameConfig {
            records: vec![RecordType::A],
            v4alt: None,
            v6alt: None,
            auth: vec![Credential {
                username: "router".to_string(),
                password: "hunter2".to_string(),
            }],
        };
        let names: BTreeMap<String, NameConfig> =
            [("home.example.net".to_string(), name)].into_iter().collect();
        let front_door = Arc::new(FrontDoor::new(names, pending.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(serve(listener, front_door, shutdown_rx));
        (addr, pending, shutdown_tx)
    }

    async fn get(addr: std::net::SocketAddr, target: &str, auth: Option<&str>) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let auth_line = auth
            .map(|a| format!("Authorization: {}\r\n", a))
            .unwrap_or_default();
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: relay\r\n{}Connection: close\r\n\r\n",
            target, auth_line
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_update_request_is_recorded() {
        let (addr, pending, _shutdown) = start().await;

        // base64("router:hunter2")
        let response = get(
            addr,
            "/nic/update?hostname=home.example.net&myip=203.0.113.7",
            Some("Basic cm91dGVyOmh1bnRlcjI="),
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("good 203.0.113.7"));
        let snapshot = pending.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].update.value, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_unknown_path_and_bad_auth() {
        let (addr, pending, _shutdown) = start().await;

        let not_found = get(addr, "/", None).await;
        assert!(not_found.starts_with("HTTP/1.1 404 Not Found"));

        let unauthorized = get(
            addr,
            "/nic/update?hostname=home.example.net&myip=1.2.3.4",
            None,
        )
        .await;
        assert!(unauthorized.ends_with("badauth"));
        assert!(pending.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let front_door = Arc::new(FrontDoor::new(BTreeMap::new(), PendingUpdateSet::new(store, 8)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, front_door, shutdown_rx));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
    }
}
