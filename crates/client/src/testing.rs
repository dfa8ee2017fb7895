//! Raw TCP HTTP responder for exercising the reqwest code paths.

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub type Requests = Arc<Mutex<Vec<String>>>;

/// Answers every connection with `handler(request_no, request)`.
/// `request_no` is 1-based; `request` holds the head and body as sent.
pub async fn serve(
    handler: impl Fn(usize, &str) -> Vec<u8> + Send + Sync + 'static,
) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let requests: Requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let request = read_request(&mut stream).await;
            let n = {
                let mut seen = seen.lock().unwrap();
                seen.push(request.clone());
                seen.len()
            };
            let _ = stream.write_all(&handler(n, &request)).await;
            let _ = stream.shutdown().await;
        }
    });
    (base, requests)
}

/// Reads the request head plus a `Content-Length` body.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = vec![0u8; 64 * 1024];
    let mut received = Vec::new();
    loop {
        let n = stream.read(&mut buf).await.unwrap_or(0);
        received.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&received);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let len = text[..head_end]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .and_then(|v| v.trim().parse::<usize>().ok())
                })
                .unwrap_or(0);
            if received.len() >= head_end + 4 + len {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

pub fn json_response(status: u16, body: &str) -> Vec<u8> {
    response(
        status,
        &[("Content-Type", "application/json")],
        body.as_bytes(),
    )
}

/// Value of the `Range: bytes=a-b` header, if any.
pub fn requested_range(request: &str) -> Option<(usize, usize)> {
    let line = request
        .lines()
        .find(|l| l.to_ascii_lowercase().starts_with("range:"))?;
    let spec = line.split_once('=')?.1.trim();
    let (start, end) = spec.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// `Host` header of `request`, for building URLs back to the responder.
pub fn host(request: &str) -> String {
    request
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("host").then(|| value.trim().to_string())
        })
        .unwrap_or_default()
}

/// Method and path of the request line.
pub fn request_line(request: &str) -> (&str, &str) {
    let mut parts = request.split(' ');
    (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
}
