use legendsvpn::proxy::{
    Candidate, DigitPrefixedList, FetcherConfig, GeoConfig, PlainTextList, ProxyManager,
    ProxySource, ProxyValidator, ValidatorConfig,
};
use legendsvpn::AppConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve the same response to every request, after `delay`
///
/// Doubles as a list provider and as a forward proxy: an HTTP proxy client
/// sends an ordinary request head, just with an absolute URI.
async fn spawn_server(status: &'static str, body: String, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&chunk[..n]),
                    }
                }

                tokio::time::sleep(delay).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

fn geo_json(ip: &str, city: &str, country: &str) -> String {
    format!(
        r#"{{"status":"success","country":"{}","countryCode":"XX","city":"{}","query":"{}"}}"#,
        country, city, ip
    )
}

/// An address nothing listens on
fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn fetch_save_validate_and_locate() {
    let fast = spawn_server("200 OK", geo_json("5.6.7.8", "Frankfurt", "Germany"), Duration::ZERO).await;
    let slow = spawn_server(
        "200 OK",
        geo_json("9.9.9.9", "Osaka", "Japan"),
        Duration::from_millis(400),
    )
    .await;
    let dead = dead_addr();

    let plain = spawn_server(
        "200 OK",
        format!("{}\n{}\n\n{}\n", slow, dead, fast),
        Duration::ZERO,
    )
    .await;
    let annotated = spawn_server(
        "200 OK",
        format!("Proxy list\nIP address:Port Country\n{} US-N +\n", fast),
        Duration::ZERO,
    )
    .await;
    let direct = spawn_server("200 OK", geo_json("1.1.1.1", "Lisbon", "Portugal"), Duration::ZERO).await;

    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::new()
        .with_data_dir(dir.path().join("data"))
        .with_sources(vec![
            ProxySource::new("plain", &format!("http://{}/list.txt", plain), PlainTextList),
            ProxySource::new("annotated", &format!("http://{}/proxy.txt", annotated), DigitPrefixedList),
            ProxySource::plain("offline", &format!("http://{}/", dead_addr())),
        ])
        .with_fetcher(
            FetcherConfig::new()
                .with_timeout(Duration::from_secs(5))
                .with_system_proxy(false),
        )
        .with_validator(ValidatorConfig::new().with_probe_timeout(Duration::from_secs(3)))
        .with_geo(
            GeoConfig::new()
                .with_endpoint(format!("http://{}/json", direct))
                .with_timeout(Duration::from_secs(3))
                .with_system_proxy(false),
        );
    let manager = ProxyManager::new(config).unwrap();

    assert_eq!(manager.fetch_proxies().await.unwrap(), 3);
    let mut expected = vec![fast.to_string(), slow.to_string(), dead.to_string()];
    expected.sort();
    let saved = std::fs::read_to_string(manager.store().path()).unwrap();
    assert_eq!(saved, expected.join("\n"));

    let working = manager.find_working_proxies(1, None).await;
    let order: Vec<_> = working.iter().map(|r| r.candidate.to_string()).collect();
    assert_eq!(order, vec![fast.to_string(), slow.to_string()]);
    assert!(working.iter().all(|r| r.is_working && r.latency_ms.is_finite()));
    assert!(working[1].latency_ms >= 400.0);

    let report = manager.connection_report(&working[0]).await;
    assert_eq!(report.proxy.to_string(), fast.to_string());
    assert_eq!(report.original.short_display(), "Lisbon, Portugal");
    assert_eq!(report.via_proxy.short_display(), "Frankfurt, Germany");
    assert_eq!(report.via_proxy.ip.as_deref(), Some("5.6.7.8"));
}

#[tokio::test]
async fn validator_keeps_only_proxies_answering_200() {
    let ok = spawn_server("200 OK", geo_json("5.6.7.8", "Berlin", "Germany"), Duration::ZERO).await;
    let unavailable = spawn_server("503 Service Unavailable", String::new(), Duration::ZERO).await;
    let dead = dead_addr();

    let validator = ProxyValidator::with_config(
        ValidatorConfig::new().with_probe_timeout(Duration::from_secs(3)),
    );
    let candidates: Vec<Candidate> = [ok, unavailable, dead]
        .iter()
        .filter_map(|addr| Candidate::new(&addr.to_string()))
        .collect();

    let working = validator.run(candidates, 1, Some(3)).await;

    assert_eq!(working.len(), 1);
    assert_eq!(working[0].candidate.to_string(), ok.to_string());
}

#[tokio::test]
async fn slow_proxy_past_probe_timeout_is_not_working() {
    let slow = spawn_server(
        "200 OK",
        geo_json("9.9.9.9", "Osaka", "Japan"),
        Duration::from_secs(3),
    )
    .await;

    let validator = ProxyValidator::with_config(
        ValidatorConfig::new().with_probe_timeout(Duration::from_millis(300)),
    );
    let working = validator
        .run(vec![Candidate::new(&slow.to_string()).unwrap()], 1, None)
        .await;

    assert!(working.is_empty());
}

#[tokio::test]
async fn missing_proxy_file_yields_no_working_proxies() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ProxyManager::new(
        AppConfig::new()
            .with_data_dir(dir.path())
            .with_sources(Vec::new()),
    )
    .unwrap();

    assert!(manager.load_candidates().is_empty());
    assert!(manager.find_working_proxies(3, Some(10)).await.is_empty());
}
