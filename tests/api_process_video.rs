use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

use motion_summary::api::{ApiConfig, ApiHandle, ApiServer};
use motion_summary::ingest::{FrameSource, SyntheticSource};
use motion_summary::writer::{StreamSpec, VideoSink, Y4mSink};
use motion_summary::{share, StubBackend, SummaryConfig, WorkerPool};

const SCENE: &str = "stub://api?frames=40&fps=10&size=64x48&subject=16&step=4&visits=10-20";

fn read_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>)> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    let headers = String::from_utf8_lossy(&response[..split]).to_string();
    let body = response.get(split + 4..).unwrap_or_default().to_vec();
    Ok((headers, body))
}

fn send(addr: std::net::SocketAddr, head: &str, body: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    read_response(&mut stream)
}

/// Render the synthetic scene into a y4m file.
fn write_scene(path: &Path) -> Result<()> {
    let mut source = SyntheticSource::from_url(SCENE)?;
    let (width, height) = source.dimensions();
    let mut sink = Y4mSink::new();
    sink.open(
        path,
        StreamSpec {
            frame_rate: source.frame_rate(),
            width,
            height,
        },
    )?;
    while let Some(frame) = source.next_frame()? {
        sink.append(&frame)?;
    }
    sink.finalize()
}

struct TestApi {
    dir: tempfile::TempDir,
    output_dir: PathBuf,
    upload_dir: PathBuf,
    api_handle: Option<ApiHandle>,
    _pool: Arc<WorkerPool>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let output_dir = dir.path().join("output");
        let upload_dir = dir.path().join("uploads");

        let mut cfg = SummaryConfig::default();
        cfg.output_dir = output_dir.clone();
        cfg.motion.area_threshold = 20;
        cfg.record_timeout = 0.5;
        cfg.prefetch_depth = 2;
        cfg.api.upload_dir = upload_dir.clone();

        let pool = Arc::new(WorkerPool::spawn(2, cfg.clone(), share(StubBackend::new()))?);
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::from_summary_config(&cfg)
        };
        let api_handle = ApiServer::new(api_config, Arc::clone(&pool)).spawn()?;

        Ok(Self {
            dir,
            output_dir,
            upload_dir,
            api_handle: Some(api_handle),
            _pool: pool,
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }

    fn upload(&self, name: &str, body: &[u8]) -> Result<(String, Vec<u8>)> {
        let head = format!(
            "POST /process-video?filename={name} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        send(self.addr(), &head, body)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_endpoint_allows_any_origin() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = send(api.addr(), "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n", b"")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert!(String::from_utf8(body)?.contains(r#""status":"ok""#));
    Ok(())
}

#[test]
fn process_then_download_summary() -> Result<()> {
    let api = TestApi::new()?;
    let clip = api.dir.path().join("clip.y4m");
    write_scene(&clip)?;
    let bytes = std::fs::read(&clip)?;

    let (headers, body) = api.upload("my%20clip.y4m", &bytes)?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_slice(&body)?;

    let logs: Vec<&str> = value["logs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(logs[0], "00:00:01 - Started recording");
    assert!(logs[1].ends_with("Stopped recording"));
    assert_eq!(value["events"][0]["kind"], "started");

    let summary_path = value["summary_video"].as_str().unwrap().to_string();
    assert!(Path::new(&summary_path).starts_with(&api.output_dir));
    assert!(summary_path.ends_with("_summary.y4m"));

    // The upload is staged outside the output dir and removed once processed.
    assert_eq!(std::fs::read_dir(&api.upload_dir)?.count(), 0);
    let outputs: Vec<String> = std::fs::read_dir(&api.output_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].ends_with("_summary.y4m"));

    let head = format!(
        "GET /download-video?video_path={} HTTP/1.1\r\nHost: localhost\r\n\r\n",
        url_encode(&summary_path)
    );
    let (headers, body) = send(api.addr(), &head, b"")?;
    assert!(headers.contains("200 OK"), "{headers}");
    assert!(headers.contains("Content-Disposition: attachment"));
    assert_eq!(body, std::fs::read(&summary_path)?);
    assert!(body.starts_with(b"YUV4MPEG2 W64 H48"));
    Ok(())
}

#[test]
fn quiet_video_has_no_summary() -> Result<()> {
    let api = TestApi::new()?;
    let clip = api.dir.path().join("quiet.y4m");
    let mut sink = Y4mSink::new();
    sink.open(
        &clip,
        StreamSpec {
            frame_rate: 10.0,
            width: 16,
            height: 16,
        },
    )?;
    for i in 0..5 {
        sink.append(&motion_summary::Frame::filled(i, 16, 16, [20, 20, 20])?)?;
    }
    sink.finalize()?;

    let (headers, body) = api.upload("quiet.y4m", &std::fs::read(&clip)?)?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_slice(&body)?;
    assert!(value["logs"].as_array().unwrap().is_empty());
    assert!(value["summary_video"].is_null());
    Ok(())
}

#[test]
fn undecodable_upload_is_a_server_error() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.upload("broken.y4m", b"this is not a video\n")?;
    assert!(headers.contains("500 Internal Server Error"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    let value: Value = serde_json::from_slice(&body)?;
    assert!(value["error"].as_str().unwrap().contains("cannot open video source"));
    Ok(())
}

#[test]
fn oversized_y4m_header_fails_without_losing_workers() -> Result<()> {
    let api = TestApi::new()?;
    for _ in 0..3 {
        let (headers, body) = api.upload("huge.y4m", b"YUV4MPEG2 W4294967295 H4294967295 C444\n")?;
        assert!(headers.contains("500 Internal Server Error"), "{headers}");
        let value: Value = serde_json::from_slice(&body)?;
        assert!(value["error"].as_str().unwrap().contains("cannot open video source"));
    }

    let clip = api.dir.path().join("clip.y4m");
    write_scene(&clip)?;
    let (headers, body) = api.upload("clip.y4m", &std::fs::read(&clip)?)?;
    assert!(headers.contains("200 OK"), "{headers}");
    let value: Value = serde_json::from_slice(&body)?;
    assert!(value["summary_video"].is_string());
    Ok(())
}

#[test]
fn download_outside_output_dir_is_not_found() -> Result<()> {
    let api = TestApi::new()?;
    let secret = api.dir.path().join("secret.txt");
    std::fs::write(&secret, b"nope")?;

    for target in [secret.display().to_string(), "/etc/hostname".to_string()] {
        let head = format!(
            "GET /download-video?video_path={} HTTP/1.1\r\nHost: localhost\r\n\r\n",
            url_encode(&target)
        );
        let (headers, body) = send(api.addr(), &head, b"")?;
        assert!(headers.contains("404 Not Found"));
        assert!(String::from_utf8(body)?.contains("File not found"));
    }
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = send(api.addr(), "GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n", b"")?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = send(
        api.addr(),
        "GET /process-video HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.contains("405 Method Not Allowed"));
    let (headers, _) = send(
        api.addr(),
        "POST /process-video?filename=a.y4m HTTP/1.1\r\nHost: localhost\r\n\r\n",
        b"",
    )?;
    assert!(headers.contains("411 Length Required"));
    Ok(())
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
