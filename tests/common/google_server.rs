//! Minimal HTTP/1.1 stand-in for the Sheets, Drive and OAuth token endpoints.
//!
//! Routes are keyed by request path as it appears on the wire (so a sheet
//! named `A/B` is registered as `.../values/A%2FB`). Drive media requests
//! are keyed as `{path}?alt=media`. Every request is recorded for assertions.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Answer 503 this many times before serving the route.
    pub fail_first: usize,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub key: String,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct State {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<Recorded>>,
}

/// A running mock. The server thread lives until the test process exits.
#[derive(Clone)]
pub struct MockGoogle {
    base: String,
    state: Arc<State>,
}

impl MockGoogle {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(State::default());
        let server_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&server_state);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{port}"),
            state,
        }
    }

    pub fn sheets_base(&self) -> String {
        format!("{}/v4", self.base)
    }

    pub fn drive_base(&self) -> String {
        format!("{}/drive/v3", self.base)
    }

    pub fn token_uri(&self) -> String {
        format!("{}/token", self.base)
    }

    pub fn route(&self, key: impl Into<String>, route: Route) {
        self.state.routes.lock().unwrap().insert(key.into(), route);
    }

    /// `values.get` for `encoded_range` answering with `rows`.
    pub fn sheet(&self, spreadsheet_id: &str, encoded_range: &str, rows: serde_json::Value) {
        let body = serde_json::json!({
            "range": format!("{encoded_range}!A1:Z1000"),
            "majorDimension": "ROWS",
            "values": rows,
        });
        self.route(
            format!("/v4/spreadsheets/{spreadsheet_id}/values/{encoded_range}"),
            json(200, &body),
        );
    }

    /// Metadata and media for one Drive file.
    pub fn file(&self, id: &str, name: &str, mime: &str, bytes: Vec<u8>) {
        let meta = serde_json::json!({
            "id": id,
            "name": name,
            "mimeType": mime,
            "size": bytes.len().to_string(),
        });
        self.route(format!("/drive/v3/files/{id}"), json(200, &meta));
        self.route(
            format!("/drive/v3/files/{id}?alt=media"),
            Route {
                status: 200,
                content_type: "application/octet-stream",
                body: bytes,
                fail_first: 0,
            },
        );
    }

    /// A file id Drive does not know.
    pub fn missing_file(&self, id: &str) {
        let err = serde_json::json!({
            "error": {"code": 404, "message": format!("File not found: {id}."), "status": "NOT_FOUND"}
        });
        self.route(format!("/drive/v3/files/{id}"), json(404, &err));
    }

    /// Token endpoint issuing `access_token` for any grant.
    pub fn token_endpoint(&self, access_token: &str) {
        let body = serde_json::json!({
            "access_token": access_token,
            "expires_in": 3599,
            "token_type": "Bearer",
            "scope": "https://www.googleapis.com/auth/drive.readonly",
        });
        self.route("/token", json(200, &body));
    }

    /// Make an existing route answer 503 `times` times first.
    pub fn flaky(&self, key: &str, times: usize) {
        if let Some(r) = self.state.routes.lock().unwrap().get_mut(key) {
            r.fail_first = times;
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn hits(&self, key: &str) -> usize {
        self.state.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

pub fn json(status: u16, body: &serde_json::Value) -> Route {
    Route {
        status,
        content_type: "application/json; charset=UTF-8",
        body: serde_json::to_vec(body).unwrap(),
        fail_first: 0,
    }
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let Some((method, target, headers, body)) = read_request(&mut stream) else {
        return;
    };

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let key = if query.split('&').any(|p| p == "alt=media") {
        format!("{path}?alt=media")
    } else {
        path.to_string()
    };

    state.requests.lock().unwrap().push(Recorded {
        method,
        key: key.clone(),
        authorization: headers.get("authorization").cloned(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let hit = {
        let mut hits = state.hits.lock().unwrap();
        let n = hits.entry(key.clone()).or_insert(0);
        *n += 1;
        *n
    };

    let route = state.routes.lock().unwrap().get(&key).cloned();
    let (status, content_type, payload) = match route {
        Some(r) if hit <= r.fail_first => (
            503,
            "application/json",
            br#"{"error":{"code":503,"message":"Backend Error"}}"#.to_vec(),
        ),
        Some(r) => (r.status, r.content_type, r.body),
        None => (404, "text/plain", b"no such route".to_vec()),
    };

    let head = format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reason(status),
        payload.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&payload);
}

type Request = (String, String, HashMap<String, String>, Vec<u8>);

/// Read headers, then as much body as `Content-Length` announces.
fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let want: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < want {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((method, target, headers, body))
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
