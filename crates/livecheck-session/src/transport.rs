//! Upload of a completed session to the classification server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DetectionCacheEntry;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/upload_nodes";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] ureq::Error),
    #[error("server answered HTTP {0}")]
    Status(u16),
    #[error("failed to encode payload: {0}")]
    Encode(serde_json::Error),
    #[error("malformed server response: {0}")]
    Decode(serde_json::Error),
    #[error("server rejected upload: {0}")]
    Rejected(String),
}

/// Body posted to the server.
#[derive(Debug, Clone, Serialize)]
pub struct UploadPayload {
    /// JPEG data URIs, oldest first.
    pub all_frames: Vec<String>,
    pub detection_cache: Vec<DetectionCacheEntry>,
}

/// Server acknowledgement. Counts are only present on success.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub blinked: Option<u32>,
    #[serde(default)]
    pub unblinked: Option<u32>,
}

/// Interpret a response body. A `"failed"` status is a rejection; a missing
/// status is accepted.
pub fn parse_receipt(text: &str) -> Result<UploadReceipt, TransportError> {
    let receipt: UploadReceipt = serde_json::from_str(text).map_err(TransportError::Decode)?;
    match receipt.status.as_deref() {
        None | Some("success") => Ok(receipt),
        Some(_) => Err(TransportError::Rejected(
            receipt
                .error
                .clone()
                .unwrap_or_else(|| "no reason given".to_string()),
        )),
    }
}

/// Delivers one payload. Implementations block; they run on the upload thread.
pub trait Transport: Send + Sync {
    fn upload(&self, payload: &UploadPayload) -> Result<UploadReceipt, TransportError>;
}

/// JSON over HTTP POST.
pub struct HttpTransport {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    fn upload(&self, payload: &UploadPayload) -> Result<UploadReceipt, TransportError> {
        let body = serde_json::to_string(payload).map_err(TransportError::Encode)?;
        tracing::debug!(endpoint = %self.endpoint, bytes = body.len(), "posting session payload");

        let mut resp = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .send(body.as_bytes())
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => TransportError::Status(code),
                other => TransportError::Request(other),
            })?;

        let text = resp.body_mut().read_to_string()?;
        parse_receipt(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Answer one request with `status` and `body`; the handle yields the raw request.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}/upload_nodes", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let end = line == "\r\n" || line.is_empty();
                head.push_str(&line);
                if end {
                    break;
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            head + &String::from_utf8_lossy(&body)
        });
        (endpoint, handle)
    }

    fn payload() -> UploadPayload {
        UploadPayload {
            all_frames: vec!["data:image/jpeg;base64,AA==".into()],
            detection_cache: vec![],
        }
    }

    #[test]
    fn test_http_success_receipt() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"status":"success","blinked":2,"unblinked":0}"#);
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));
        let receipt = transport.upload(&payload()).unwrap();
        assert_eq!(receipt.blinked, Some(2));
        assert_eq!(receipt.unblinked, Some(0));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /upload_nodes"));
        assert!(request
            .to_ascii_lowercase()
            .contains("content-type: application/json"));
        assert!(request.contains(r#""all_frames":["data:image/jpeg;base64,AA=="]"#));
        assert!(request.contains(r#""detection_cache":[]"#));
    }

    #[test]
    fn test_http_error_status() {
        let (endpoint, server) = serve_once("500 Internal Server Error", "{}");
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));
        assert!(matches!(
            transport.upload(&payload()),
            Err(TransportError::Status(500))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_http_failed_status_is_rejection() {
        let (endpoint, server) =
            serve_once("200 OK", r#"{"status":"failed","error":"No frames received"}"#);
        let transport = HttpTransport::new(endpoint, Duration::from_secs(5));
        match transport.upload(&payload()) {
            Err(TransportError::Rejected(reason)) => assert_eq!(reason, "No frames received"),
            other => panic!("unexpected result: {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_success_receipt() {
        let r = parse_receipt(r#"{"status":"success","blinked":1,"unblinked":2}"#).unwrap();
        assert_eq!(r.blinked, Some(1));
        assert_eq!(r.unblinked, Some(2));
    }

    #[test]
    fn test_failed_status_is_rejection() {
        let err = parse_receipt(r#"{"status":"failed","error":"No frames received"}"#).unwrap_err();
        match err {
            TransportError::Rejected(reason) => assert_eq!(reason, "No frames received"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_status_accepted() {
        assert_eq!(parse_receipt("{}").unwrap(), UploadReceipt::default());
    }

    #[test]
    fn test_non_json_body_is_decode_error() {
        assert!(matches!(
            parse_receipt("<html>oops</html>"),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_payload_field_names() {
        let payload = UploadPayload {
            all_frames: vec!["data:image/jpeg;base64,AA==".into()],
            detection_cache: vec![DetectionCacheEntry {
                timestamp: 7,
                ear: 0.3,
                left_ear: 0.3,
                right_ear: 0.3,
            }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["all_frames"][0], "data:image/jpeg;base64,AA==");
        assert_eq!(json["detection_cache"][0]["timestamp"], 7);
    }
}
