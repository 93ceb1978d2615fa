//! The real HTTP source against a loopback server.

use super::harness::{package_zip, sha256_hex, TestInstall};
use portable_updater::config::UpdaterConfig;
use portable_updater::upgrade::{CheckOutcome, HttpSource, PackageSource, UpdateChecker};
use portable_updater::Error;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serve `routes` (path -> body) over HTTP/1.1 until the test ends.
/// Unknown paths get a 404.
fn serve(listener: TcpListener, routes: HashMap<String, Vec<u8>>) {
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = match routes.get(&path) {
                    Some(body) => ("200 OK", body.clone()),
                    None => ("404 Not Found", b"not found".to_vec()),
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
}

fn config_for(addr: SocketAddr) -> UpdaterConfig {
    UpdaterConfig {
        manifest_url: format!("http://{addr}/manifest.json"),
        min_package_bytes: 0,
        ..UpdaterConfig::default()
    }
}

/// Test 1: Manifest fetch, streamed download and staging over real HTTP
#[tokio::test]
async fn test_http_check_stages_release() {
    let package = package_zip(&[("app.bin", "v2")]);
    let (listener, addr) = bind().await;

    let manifest = serde_json::json!({
        "version": "9.9.9.9",
        "release_tag": "v9.9.9.9",
        "channel": "stable",
        "assets": {
            "linux": {
                "url": format!("http://{addr}/pkg/app-linux.zip"),
                "sha256": sha256_hex(&package),
                "type": "portable"
            }
        }
    });
    let routes = HashMap::from([
        ("/manifest.json".to_string(), manifest.to_string().into_bytes()),
        ("/pkg/app-linux.zip".to_string(), package),
    ]);
    serve(listener, routes);

    let install = TestInstall::new();
    let config = config_for(addr);
    let source = HttpSource::new(&config).unwrap();
    let outcome = UpdateChecker::new(install.context("0.3.0.0"), config, source)
        .check()
        .await
        .unwrap();

    let CheckOutcome::Staged(update) = outcome else {
        panic!("expected a staged update, got {outcome:?}");
    };
    assert_eq!(update.version, "9.9.9.9");
    assert!(update.verified);
    assert!(update.staging_dir.join("app.bin").is_file());
}

/// Test 2: HTTP error statuses map to the matching error kinds
#[tokio::test]
async fn test_http_error_statuses() {
    let (listener, addr) = bind().await;
    serve(listener, HashMap::new());
    let config = config_for(addr);
    let source = HttpSource::new(&config).unwrap();

    let manifest = source.fetch_manifest(&config.manifest_url).await;
    assert!(matches!(manifest, Err(Error::ManifestUnreachable(_))));

    let mut sink = Vec::new();
    let download = source
        .download(&format!("http://{addr}/missing.zip"), &mut sink)
        .await;
    assert!(matches!(download, Err(Error::DownloadFailed(_))));
    assert!(sink.is_empty());
}

/// Test 3: Nothing listening is reported as an unreachable manifest
#[tokio::test]
async fn test_http_connection_refused() {
    let (listener, addr) = bind().await;
    drop(listener);

    let config = config_for(addr);
    let source = HttpSource::new(&config).unwrap();
    let result = source.fetch_manifest(&config.manifest_url).await;
    assert!(matches!(result, Err(Error::ManifestUnreachable(_))));
}
