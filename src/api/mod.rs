//! Minimal HTTP surface for browser clients.
//!
//! `POST /process-video?filename=<name>` takes the raw video as the request
//! body, runs it through the worker pool and answers with the timeline and the
//! summary path. `GET /download-video?video_path=<path>` serves a summary from
//! the output directory. Uploads wait in a separate directory so they are never
//! downloadable. Every response allows any origin.

use crate::config::SummaryConfig;
use crate::pipeline::RunSummary;
use crate::worker::{Job, WorkerPool};
use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_FILENAME_CHARS: usize = 100;
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// File stem suffix of every produced summary.
const SUMMARY_SUFFIX: &str = "_summary";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub output_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::from_summary_config(&SummaryConfig::default())
    }
}

impl ApiConfig {
    pub fn from_summary_config(cfg: &SummaryConfig) -> Self {
        Self {
            addr: cfg.api.addr.clone(),
            output_dir: cfg.output_dir.clone(),
            upload_dir: cfg.api.upload_dir.clone(),
            max_upload_bytes: cfg.api.max_upload_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

struct ApiContext {
    cfg: ApiConfig,
    pool: Arc<WorkerPool>,
}

pub struct ApiServer {
    cfg: ApiConfig,
    pool: Arc<WorkerPool>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pool: Arc<WorkerPool>) -> Self {
        Self { cfg, pool }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        for dir in [&self.cfg.output_dir, &self.cfg.upload_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        if self
            .cfg
            .upload_dir
            .canonicalize()?
            .starts_with(self.cfg.output_dir.canonicalize()?)
        {
            return Err(anyhow!(
                "upload directory {} must not be inside the output directory {}",
                self.cfg.upload_dir.display(),
                self.cfg.output_dir.display()
            ));
        }

        let ctx = Arc::new(ApiContext {
            cfg: self.cfg,
            pool: self.pool,
        });
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("summary-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx, shutdown_thread) {
                    log::error!("summary api stopped: {}", err);
                }
            })?;
        log::info!("summary api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, ctx: Arc<ApiContext>, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let ctx = Arc::clone(&ctx);
                // Processing can take minutes; keep accepting meanwhile.
                let spawned = std::thread::Builder::new()
                    .name("summary-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &ctx) {
                            log::warn!("summary api request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection handler: {}", err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    log::debug!("{} {}", request.method, request.path);
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => write_response(&mut stream, 204, "text/plain", &[], &[]),
        ("GET", "/health") => write_json_response(&mut stream, 200, &json!({"status": "ok"})),
        ("POST", "/process-video") => process_video(&mut stream, &request, ctx),
        ("GET", "/download-video") => download_video(&mut stream, &request, ctx),
        (_, "/health" | "/process-video" | "/download-video") => write_json_response(
            &mut stream,
            405,
            &json!({"error": "method_not_allowed"}),
        ),
        _ => write_json_response(&mut stream, 404, &json!({"error": "not_found"})),
    }
}

fn process_video(stream: &mut TcpStream, request: &HttpRequest, ctx: &ApiContext) -> Result<()> {
    let Some(length) = request.content_length() else {
        return write_json_response(stream, 411, &json!({"error": "Content-Length required"}));
    };
    if length > ctx.cfg.max_upload_bytes {
        return write_json_response(
            stream,
            413,
            &json!({"error": format!("upload exceeds {} bytes", ctx.cfg.max_upload_bytes)}),
        );
    }

    let filename = sanitize_filename(request.query("filename").unwrap_or("upload"));
    let upload_path = ctx
        .cfg
        .upload_dir
        .join(format!("{}_{}", random_hex(16), filename));

    let outcome = store_upload(stream, &request.body_prefix, length, &upload_path)
        .and_then(|()| run_job(ctx, &upload_path));
    if upload_path.exists() {
        if let Err(err) = std::fs::remove_file(&upload_path) {
            log::warn!("failed to remove upload {}: {}", upload_path.display(), err);
        }
    }

    match outcome {
        Ok(summary) => write_json_response(stream, 200, &process_payload(&summary)),
        Err(err) => {
            log::warn!("process-video failed for {}: {:#}", filename, err);
            write_json_response(stream, 500, &json!({"error": format!("{:#}", err)}))
        }
    }
}

fn store_upload(stream: &mut TcpStream, prefix: &[u8], length: u64, path: &Path) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("failed to store upload at {}", path.display()))?;
    let prefix_len = (prefix.len() as u64).min(length);
    file.write_all(&prefix[..prefix_len as usize])?;
    let remaining = length - prefix_len;
    let copied = io::copy(&mut stream.take(remaining), &mut file)?;
    if copied != remaining {
        return Err(anyhow!(
            "upload truncated: expected {} bytes, received {}",
            length,
            prefix_len + copied
        ));
    }
    file.flush()?;
    log::info!("stored upload {} ({} bytes)", path.display(), length);
    Ok(())
}

fn run_job(ctx: &ApiContext, upload_path: &Path) -> Result<RunSummary> {
    let input = upload_path
        .to_str()
        .ok_or_else(|| anyhow!("upload path is not valid UTF-8"))?;
    let summary = ctx.pool.run(Job::new(input))??;
    Ok(summary)
}

fn process_payload(summary: &RunSummary) -> serde_json::Value {
    json!({
        "logs": summary.log_lines(),
        "events": summary.events,
        "summary_video": summary
            .output_path
            .as_ref()
            .map(|path| path.display().to_string()),
    })
}

fn download_video(stream: &mut TcpStream, request: &HttpRequest, ctx: &ApiContext) -> Result<()> {
    let Some(path) = request
        .query("video_path")
        .and_then(|raw| resolve_download(&ctx.cfg.output_dir, raw))
    else {
        return write_json_response(stream, 404, &json!({"error": "File not found"}));
    };

    let mut file = File::open(&path)?;
    let len = file.metadata()?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "summary".to_string());
    let disposition = format!("attachment; filename=\"{}\"", name);
    write_head(
        stream,
        200,
        content_type_for(&path),
        len,
        &[("Content-Disposition", disposition.as_str())],
    )?;
    io::copy(&mut file, stream)?;
    Ok(())
}

/// Only existing summary files inside the output directory can be downloaded.
fn resolve_download(output_dir: &Path, raw: &str) -> Option<PathBuf> {
    let root = output_dir.canonicalize().ok()?;
    let candidate = Path::new(raw).canonicalize().ok()?;
    let is_summary = candidate
        .file_stem()
        .and_then(|stem| stem.to_str())
        .is_some_and(|stem| stem.ends_with(SUMMARY_SUFFIX));
    if candidate.starts_with(&root) && candidate.is_file() && is_summary {
        Some(candidate)
    } else {
        None
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("mp4") => "video/mp4",
        Some(ext) if ext.eq_ignore_ascii_case("y4m") => "video/x-yuv4mpeg",
        _ => "application/octet-stream",
    }
}

/// Strip directories and anything outside `[A-Za-z0-9._-]` from a client name.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_CHARS)
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let body_prefix = data[header_end + 4..].to_vec();
    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        path: path.to_string(),
        query,
        headers,
        body_prefix,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload, &[])
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    extra_headers: &[(&str, &str)],
) -> Result<()> {
    write_head(stream, status, content_type, body.len() as u64, extra_headers)?;
    stream.write_all(body)?;
    Ok(())
}

fn write_head(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    len: u64,
    extra_headers: &[(&str, &str)],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\
         Access-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: *\r\n"
    );
    for (name, value) in extra_headers {
        header.push_str(&format!("{name}: {value}\r\n"));
    }
    header.push_str("\r\n");
    stream.write_all(header.as_bytes())?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Vec<(String, String)>,
    headers: HashMap<String, String>,
    /// Body bytes that arrived together with the headers.
    body_prefix: Vec<u8>,
}

impl HttpRequest {
    fn query(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn content_length(&self) -> Option<u64> {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_client_filenames() {
        assert_eq!(sanitize_filename("clip.mp4"), "clip.mp4");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\videos\\my clip.mov"), "my_clip.mov");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename(&"a".repeat(300)).len(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn downloads_are_confined_to_the_output_dir() {
        let root = tempfile::tempdir().unwrap();
        let output = root.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        let inside = output.join("abc_summary.y4m");
        std::fs::write(&inside, b"x").unwrap();
        let outside = root.path().join("secret.txt");
        std::fs::write(&outside, b"x").unwrap();

        assert!(resolve_download(&output, inside.to_str().unwrap()).is_some());
        assert!(resolve_download(&output, outside.to_str().unwrap()).is_none());
        let sneaky = output.join("..").join("secret.txt");
        assert!(resolve_download(&output, sneaky.to_str().unwrap()).is_none());
        assert!(resolve_download(&output, output.to_str().unwrap()).is_none());
        assert!(resolve_download(&output, "/does/not/exist").is_none());
    }

    #[test]
    fn only_summaries_are_downloadable() {
        let root = tempfile::tempdir().unwrap();
        let output = root.path().join("output");
        std::fs::create_dir_all(&output).unwrap();
        let staged = output.join("0f0f_clip.y4m");
        std::fs::write(&staged, b"raw upload").unwrap();
        let summary = output.join("0f0f_summary.mp4");
        std::fs::write(&summary, b"x").unwrap();

        assert!(resolve_download(&output, staged.to_str().unwrap()).is_none());
        assert!(resolve_download(&output, summary.to_str().unwrap()).is_some());
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.y4m")), "video/x-yuv4mpeg");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
