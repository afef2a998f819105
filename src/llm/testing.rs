//! Test doubles for the completion engine.

use super::client::CompletionEngine;
use super::models::{EngineReply, EngineRequest};
use crate::error::{SpliceError, SpliceResult};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Replays canned replies in order and records every request it sees.
pub(crate) struct ScriptedEngine {
    replies: Mutex<VecDeque<SpliceResult<String>>>,
    seen: Mutex<Vec<EngineRequest>>,
}

impl ScriptedEngine {
    pub fn new(replies: Vec<SpliceResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl CompletionEngine for ScriptedEngine {
    async fn complete(&self, request: &EngineRequest) -> SpliceResult<EngineReply> {
        self.seen.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(text)) => Ok(EngineReply { text, usage: None }),
            Some(Err(err)) => Err(err),
            None => Err(SpliceError::EngineRequest {
                status: None,
                body: "script exhausted".to_string(),
            }),
        }
    }
}

/// Serve exactly one HTTP response on a loopback port.
///
/// Returns the endpoint URL and a handle yielding the raw request text.
pub(crate) async fn serve_once(status: u16, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if request_complete(&raw) {
                break;
            }
        }

        let response = format!(
            "HTTP/1.1 {} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&raw).into_owned()
    });

    (format!("http://{}/v1/responses", addr), handle)
}

fn request_complete(raw: &[u8]) -> bool {
    let Some(header_end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&raw[..header_end]);
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    raw.len() >= header_end + 4 + content_length
}
