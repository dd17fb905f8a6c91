//! Minimal HTTP/1.1 server for exercising the real curl transport.
//!
//! Serves canned responses by request path and counts hits per path.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct Canned {
    pub status: u32,
    pub reason: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Canned {
    pub fn no_content() -> Self {
        Self {
            status: 204,
            reason: "No Content",
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            reason: "Found",
            headers: vec![("Location", location.to_string())],
            body: Vec::new(),
        }
    }

    pub fn ok(content_type: &str, body: &[u8]) -> Self {
        Self {
            status: 200,
            reason: "OK",
            headers: vec![("Content-Type", content_type.to_string())],
            body: body.to_vec(),
        }
    }
}

#[derive(Clone, Default)]
pub struct PortalServer {
    routes: Arc<Mutex<HashMap<String, Canned>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl PortalServer {
    pub fn route(&self, path: &str, canned: Canned) -> &Self {
        self.routes.lock().unwrap().insert(path.to_string(), canned);
        self
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

/// Starts the server on a background thread. Returns the handle and the base
/// URL (e.g. "http://127.0.0.1:12345"). The server runs until the process exits.
pub fn start() -> (PortalServer, String) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let server = PortalServer::default();
    let shared = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let server = shared.clone();
            thread::spawn(move || handle(stream, &server));
        }
    });
    (server, format!("http://127.0.0.1:{}", port))
}

fn handle(mut stream: std::net::TcpStream, server: &PortalServer) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    *server.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let canned = server.routes.lock().unwrap().get(&path).cloned();
    let canned = canned.unwrap_or(Canned {
        status: 404,
        reason: "Not Found",
        headers: Vec::new(),
        body: Vec::new(),
    });
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        canned.status,
        canned.reason,
        canned.body.len()
    );
    for (name, value) in &canned.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(&canned.body);
    let _ = stream.flush();
}
