//! Native curl backend.
//!
//! Every fetch spawns the system `curl` binary with `--include`, reads the
//! response head from its standard output and streams the rest as the body.
//! The exit status of curl is only known once the body is drained: a failed
//! transfer surfaces as the last item of the body stream, classified from the
//! curl exit code.
//!
//! The child is spawned with `kill_on_drop`, so dropping the body stream
//! (timeout, cancellation, destination failure) terminates the transfer.

use super::{Backend, BackendConfig, BackendResponse, MAX_REDIRECTS};
use crate::download::descriptor::method_allows_body;
use crate::download::Descriptor;
use crate::error::{FailureKind, FetchFailure};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

/// Backend driving the `curl` command line tool.
#[derive(Debug, Clone)]
pub struct CurlBackend {
    program: PathBuf,
    config: BackendConfig,
}

impl CurlBackend {
    /// Use the `curl` found on `PATH`.
    pub fn new(config: BackendConfig) -> Self {
        Self {
            program: PathBuf::from("curl"),
            config,
        }
    }

    /// Use a specific curl executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether the curl executable can be run.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Command line arguments for one transfer.
    fn args(&self, descriptor: &Descriptor, url: &str, timeout: Duration) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--silent".into(), "--show-error".into()];
        let method = descriptor.method();
        let has_body = descriptor.body().is_some() && method_allows_body(method);

        if *method == Method::HEAD {
            args.push("--head".into());
        } else {
            args.push("--include".into());
            if !(*method == Method::GET || (*method == Method::POST && has_body)) {
                args.push("--request".into());
                args.push(method.as_str().into());
            }
        }

        args.push("--max-time".into());
        args.push(format!("{:.3}", timeout.as_secs_f64()).into());
        args.push("--connect-timeout".into());
        args.push(format!("{:.3}", self.config.connect_timeout.as_secs_f64()).into());

        if self.config.follow_redirects {
            args.push("--location".into());
            args.push("--max-redirs".into());
            args.push(MAX_REDIRECTS.to_string().into());
        }
        if !self.config.verify_tls {
            args.push("--insecure".into());
        }
        if let Some(proxy) = &self.config.proxy {
            args.push("--proxy".into());
            args.push(proxy.into());
            args.push("--suppress-connect-headers".into());
        }

        let headers = merged_headers(self.config.headers.as_ref(), descriptor.headers());
        if !headers.contains_key(USER_AGENT) {
            args.push("--user-agent".into());
            args.push(self.config.user_agent.as_str().into());
        }
        for (name, value) in &headers {
            args.push("--header".into());
            args.push(header_arg(name, value));
        }

        if has_body {
            args.push("--data-binary".into());
            args.push("@-".into());
        }

        args.push("--url".into());
        args.push(url.into());
        args
    }
}

/// Default headers overridden name by name by the descriptor headers.
fn merged_headers(defaults: Option<&HeaderMap>, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.cloned().unwrap_or_default();
    for name in overrides.keys() {
        merged.remove(name);
    }
    for (name, value) in overrides {
        merged.append(name.clone(), value.clone());
    }
    merged
}

fn header_arg(name: &HeaderName, value: &HeaderValue) -> OsString {
    let value = String::from_utf8_lossy(value.as_bytes());
    if value.is_empty() {
        // `name;` is how curl sends a header without a value.
        format!("{};", name).into()
    } else {
        format!("{}: {}", name, value).into()
    }
}

#[async_trait]
impl Backend for CurlBackend {
    fn name(&self) -> &str {
        "curl"
    }

    async fn fetch(
        &self,
        descriptor: &Descriptor,
        timeout: Duration,
    ) -> Result<BackendResponse, FetchFailure> {
        let url = descriptor
            .request_url()
            .map_err(|e| FetchFailure::new(FailureKind::MalformedUrl, e.to_string()))?;
        debug!(method = %descriptor.method(), url = %url, "Spawning curl");

        let body = descriptor
            .body()
            .filter(|_| method_allows_body(descriptor.method()))
            .cloned();

        let mut command = Command::new(&self.program);
        command
            .args(self.args(descriptor, url.as_str(), timeout))
            .stdin(if body.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            FetchFailure::new(
                FailureKind::Unavailable,
                format!("cannot run {}: {}", self.program.display(), e),
            )
        })?;

        if let (Some(mut stdin), Some(body)) = (child.stdin.take(), body) {
            tokio::spawn(async move {
                // A write error means curl went away; its exit code tells why.
                let _ = stdin.write_all(&body).await;
            });
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            FetchFailure::new(FailureKind::Unavailable, "curl standard output is not captured")
        })?;
        let stderr = child.stderr.take();
        let mut transfer = Transfer {
            child,
            stdout: BufReader::with_capacity(CHUNK_SIZE, stdout),
            stderr,
        };

        let (status, headers) = match transfer.read_head(self.config.follow_redirects).await? {
            Some(head) => head,
            None => return Err(transfer.failure().await),
        };

        Ok(BackendResponse {
            status,
            headers,
            body: transfer.into_body(),
        })
    }
}

/// A running curl process.
struct Transfer {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl Transfer {
    /// Read response heads until the final one.
    ///
    /// Informational responses are skipped, and so are redirects when curl
    /// follows them. `None` means curl stopped before a complete head.
    async fn read_head(
        &mut self,
        follow_redirects: bool,
    ) -> Result<Option<(StatusCode, HeaderMap)>, FetchFailure> {
        let mut line = Vec::new();
        loop {
            line.clear();
            if self.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let status = parse_status_line(&line).ok_or_else(|| {
                FetchFailure::new(
                    FailureKind::MalformedResponse,
                    format!(
                        "invalid status line \"{}\"",
                        String::from_utf8_lossy(trim_eol(&line))
                    ),
                )
            })?;

            let mut headers = HeaderMap::new();
            loop {
                line.clear();
                if self.read_line(&mut line).await? == 0 {
                    return Ok(None);
                }
                let header = trim_eol(&line);
                if header.is_empty() {
                    break;
                }
                if let Some((name, value)) = parse_header_line(header) {
                    headers.append(name, value);
                }
            }

            if status.is_informational() {
                continue;
            }
            if follow_redirects && status.is_redirection() && headers.contains_key(LOCATION) {
                continue;
            }
            return Ok(Some((status, headers)));
        }
    }

    async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<usize, FetchFailure> {
        self.stdout
            .read_until(b'\n', line)
            .await
            .map_err(|e| FetchFailure::new(FailureKind::ConnectionReset, e.to_string()))
    }

    /// Wait for curl to exit and turn a failed exit into a [`FetchFailure`].
    async fn finish(&mut self) -> Result<(), FetchFailure> {
        let mut message = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            let _ = stderr.read_to_string(&mut message).await;
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| FetchFailure::new(FailureKind::Other, e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(exit_failure(code, message.trim())),
            None => Err(FetchFailure::new(
                FailureKind::Other,
                "curl was terminated by a signal",
            )),
        }
    }

    /// The failure of a transfer that ended without a usable response.
    async fn failure(mut self) -> FetchFailure {
        match self.finish().await {
            Err(failure) => failure,
            Ok(()) => FetchFailure::new(
                FailureKind::MalformedResponse,
                "curl exited without a complete response head",
            ),
        }
    }

    fn into_body(self) -> super::BodyStream {
        futures::stream::unfold(Some(self), |state| async move {
            let mut transfer = state?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            match transfer.stdout.read(&mut buf).await {
                Ok(0) => match transfer.finish().await {
                    Ok(()) => None,
                    Err(failure) => Some((Err(failure), None)),
                },
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(transfer)))
                }
                Err(e) => Some((Err(read_failure(e)), None)),
            }
        })
        .boxed()
    }
}

fn read_failure(error: io::Error) -> FetchFailure {
    FetchFailure::new(FailureKind::ConnectionReset, error.to_string())
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// `HTTP/1.1 200 OK`, `HTTP/2 404`.
fn parse_status_line(line: &[u8]) -> Option<StatusCode> {
    let line = std::str::from_utf8(trim_eol(line)).ok()?;
    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?.parse::<u16>().ok()?;
    StatusCode::from_u16(code).ok()
}

fn parse_header_line(line: &[u8]) -> Option<(HeaderName, HeaderValue)> {
    let colon = line.iter().position(|b| *b == b':')?;
    let name = HeaderName::from_bytes(line[..colon].trim_ascii()).ok()?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).ok()?;
    Some((name, value))
}

/// Classify a curl exit code.
fn exit_failure(code: i32, message: &str) -> FetchFailure {
    let kind = match code {
        1 | 3 => FailureKind::MalformedUrl,
        5 | 6 => FailureKind::Dns,
        7 => FailureKind::Connect,
        28 => FailureKind::Timeout,
        18 | 52 | 55 | 56 => FailureKind::ConnectionReset,
        35 | 51 | 53 | 54 | 58 | 59 | 60 | 64 | 66 | 77 | 80 | 82 | 83 | 90 | 91 => {
            FailureKind::Tls
        }
        8 => FailureKind::MalformedResponse,
        _ => FailureKind::Other,
    };
    let message = if message.is_empty() {
        format!("curl exited with code {}", code)
    } else {
        format!("curl exited with code {}: {}", code, message)
    };
    FetchFailure::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(backend: &CurlBackend, descriptor: &Descriptor) -> Vec<String> {
        backend
            .args(descriptor, descriptor.url(), Duration::from_secs(30))
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_get_arguments() {
        let backend = CurlBackend::new(BackendConfig::default());
        let args = args_of(&backend, &Descriptor::new("https://example.test/a.txt"));

        assert!(args.contains(&"--include".to_string()));
        assert!(args.contains(&"--location".to_string()));
        assert!(!args.contains(&"--request".to_string()));
        assert!(!args.contains(&"--insecure".to_string()));
        assert!(!args.contains(&"--data-binary".to_string()));
        assert_eq!(args[args.len() - 2..], ["--url", "https://example.test/a.txt"]);
    }

    #[test]
    fn test_method_body_and_headers() {
        let backend = CurlBackend::new(BackendConfig {
            follow_redirects: false,
            verify_tls: false,
            ..BackendConfig::default()
        });
        let descriptor = Descriptor::new("https://example.test/items")
            .with_method(Method::PUT)
            .with_header("x-token", HeaderValue::from_static("abc"))
            .with_header("x-empty", HeaderValue::from_static(""))
            .with_body("payload");
        let args = args_of(&backend, &descriptor);

        let request = args.iter().position(|a| a == "--request").unwrap();
        assert_eq!(args[request + 1], "PUT");
        assert!(args.contains(&"x-token: abc".to_string()));
        assert!(args.contains(&"x-empty;".to_string()));
        assert!(args.contains(&"--insecure".to_string()));
        assert!(!args.contains(&"--location".to_string()));
        let data = args.iter().position(|a| a == "--data-binary").unwrap();
        assert_eq!(args[data + 1], "@-");
    }

    #[test]
    fn test_head_uses_head_flag() {
        let backend = CurlBackend::new(BackendConfig::default());
        let args = args_of(
            &backend,
            &Descriptor::new("https://example.test/").with_method(Method::HEAD),
        );
        assert!(args.contains(&"--head".to_string()));
        assert!(!args.contains(&"--include".to_string()));
    }

    #[test]
    fn test_descriptor_headers_override_defaults() {
        let mut defaults = HeaderMap::new();
        defaults.insert(USER_AGENT, HeaderValue::from_static("default-agent"));
        defaults.insert("x-shared", HeaderValue::from_static("default"));
        let mut overrides = HeaderMap::new();
        overrides.insert("x-shared", HeaderValue::from_static("mine"));

        let merged = merged_headers(Some(&defaults), &overrides);
        assert_eq!(merged.get("x-shared").unwrap(), "mine");
        assert_eq!(merged.get_all("x-shared").iter().count(), 1);
        assert_eq!(merged.get(USER_AGENT).unwrap(), "default-agent");
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK\r\n"), Some(StatusCode::OK));
        assert_eq!(parse_status_line(b"HTTP/2 404\r\n"), Some(StatusCode::NOT_FOUND));
        assert_eq!(parse_status_line(b"garbage\r\n"), None);
        assert_eq!(parse_status_line(b"HTTP/1.1 abc\r\n"), None);
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = parse_header_line(b"Content-Type:  text/plain ").unwrap();
        assert_eq!(name, "content-type");
        assert_eq!(value, "text/plain");
        assert!(parse_header_line(b"no colon here").is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_failure(6, "").kind, FailureKind::Dns);
        assert_eq!(exit_failure(7, "").kind, FailureKind::Connect);
        assert_eq!(exit_failure(28, "").kind, FailureKind::Timeout);
        assert_eq!(exit_failure(56, "").kind, FailureKind::ConnectionReset);
        assert_eq!(exit_failure(60, "").kind, FailureKind::Tls);
        assert_eq!(exit_failure(3, "").kind, FailureKind::MalformedUrl);
        assert_eq!(exit_failure(47, "").kind, FailureKind::Other);
        assert!(exit_failure(28, "").is_transient());
        assert!(!exit_failure(60, "").is_transient());
        assert!(exit_failure(7, "Failed to connect")
            .message
            .contains("Failed to connect"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let backend = CurlBackend::new(BackendConfig::default())
            .with_program("/nonexistent/fetchkeep-curl");
        assert!(!backend.is_available().await);

        let err = backend
            .fetch(
                &Descriptor::new("https://example.test/a.txt"),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Unavailable);
    }
}
