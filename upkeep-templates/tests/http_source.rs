//! HTTP transport tests against a loopback stub server.
//!
//! Each stub serves canned replies keyed by request path, one connection at a
//! time, with `Connection: close` so every request opens a fresh socket.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use upkeep_core::config::ReleaseConfig;
use upkeep_templates::{
    HttpReleaseSource, ReleaseOrigin, ReleaseSource, RetryPolicy, TemplateCatalog, TemplateError,
    TemplateManager, TransportError,
};

#[derive(Clone)]
enum Reply {
    Ok(&'static str),
    Status(u16, &'static str),
    /// Promise `declared` bytes, send `body`, then close.
    Short { declared: usize, body: &'static str },
    /// Accept and say nothing.
    Hang(Duration),
}

fn read_request_path(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf);
    head.split_whitespace().nth(1).unwrap_or("/").to_string()
}

fn serve(routes: HashMap<&'static str, Reply>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let path = read_request_path(&mut stream);
            let reply = routes
                .get(path.as_str())
                .cloned()
                .unwrap_or(Reply::Status(404, "Not Found"));
            let _ = match reply {
                Reply::Ok(body) => write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                ),
                Reply::Status(code, text) => write!(
                    stream,
                    "HTTP/1.1 {code} {text}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                ),
                Reply::Short { declared, body } => write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n{body}"
                ),
                Reply::Hang(d) => {
                    thread::sleep(d);
                    Ok(())
                }
            };
            let _ = stream.flush();
        }
    });
    format!("http://{addr}")
}

fn config(base: &str) -> ReleaseConfig {
    ReleaseConfig {
        api_url: format!("{base}/repo"),
        raw_url: format!("{base}/raw"),
        timeout_secs: 1,
        max_attempts: 2,
        base_delay_ms: 0,
        ..ReleaseConfig::default()
    }
}

const RELEASE_JSON: &str = r#"{"tag_name":"v1.0.0","name":"one","body":"first"}"#;

#[test]
fn latest_release_is_parsed() {
    let base = serve(HashMap::from([("/repo/releases/latest", Reply::Ok(RELEASE_JSON))]));
    let release = HttpReleaseSource::new(&config(&base))
        .latest_release()
        .expect("release");
    assert_eq!(release.version, "v1.0.0");
    assert_eq!(release.notes.as_deref(), Some("first"));
}

#[test]
fn forbidden_release_endpoint_still_leaves_cache_usable() {
    let base = serve(HashMap::from([
        ("/repo/releases/latest", Reply::Status(403, "Forbidden")),
        ("/raw/v1.0.0/CLAUDE.md", Reply::Ok("root\n")),
    ]));
    let cache = TempDir::new().expect("cache");
    let cfg = config(&base);
    let mgr = TemplateManager::new(cache.path(), HttpReleaseSource::new(&cfg))
        .with_retry(RetryPolicy::from_config(&cfg))
        .with_catalog(TemplateCatalog::new(vec![
            "CLAUDE.md".into(),
            ".claude/agents/absent.md".into(),
        ]));

    mgr.download_template("v1.0.0", false).expect("download");
    let manifest = mgr.load_manifest("v1.0.0").expect("manifest");
    assert_eq!(manifest.files.len(), 1, "404 file must be omitted");

    let err = mgr.fetch_latest_release().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("Failed to fetch latest release"), "got: {msg}");
    assert!(msg.contains("HTTP 403"), "got: {msg}");

    let cached = mgr.get_cached_template("v1.0.0").expect("cached path");
    assert!(cached.join("files/CLAUDE.md").is_file());

    let resolved = mgr.resolve_latest_release().expect("offline resolve");
    assert_eq!(resolved.origin, ReleaseOrigin::Cache);
    assert_eq!(resolved.release.version, "v1.0.0");
}

#[test]
fn stalled_server_times_out() {
    let base = serve(HashMap::from([(
        "/repo/releases/latest",
        Reply::Hang(Duration::from_secs(5)),
    )]));
    let started = Instant::now();
    let err = HttpReleaseSource::new(&config(&base))
        .latest_release()
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout);
    assert_eq!(err.to_string(), "Request timeout");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn short_body_is_reported_as_truncated() {
    let base = serve(HashMap::from([(
        "/raw/v1.0.0/CLAUDE.md",
        Reply::Short {
            declared: 100,
            body: "only ten..",
        },
    )]));
    let mut sink = Vec::new();
    let err = HttpReleaseSource::new(&config(&base))
        .download_file("v1.0.0", "CLAUDE.md", &mut sink)
        .unwrap_err();
    assert!(matches!(err, TransportError::Truncated { expected: 100, .. }), "got: {err:?}");
}

#[test]
fn truncated_download_leaves_no_cache_entry() {
    let base = serve(HashMap::from([
        ("/raw/v2.0.0/CLAUDE.md", Reply::Ok("root\n")),
        (
            "/raw/v2.0.0/templates/CLAUDE.md.template",
            Reply::Short {
                declared: 64,
                body: "partial",
            },
        ),
    ]));
    let cache = TempDir::new().expect("cache");
    let cfg = config(&base);
    let mgr = TemplateManager::new(cache.path(), HttpReleaseSource::new(&cfg))
        .with_retry(RetryPolicy::none())
        .with_catalog(TemplateCatalog::new(vec![
            "CLAUDE.md".into(),
            "templates/CLAUDE.md.template".into(),
        ]));

    let err = mgr.download_template("v2.0.0", false).unwrap_err();
    assert!(matches!(err, TemplateError::Download(_)));
    assert!(err.to_string().starts_with("Template download failed: "));
    assert!(mgr.get_cached_template("v2.0.0").is_none());
    let leftovers = std::fs::read_dir(cache.path()).expect("ls").count();
    assert_eq!(leftovers, 0, "staging directory must be removed");
}
