use std::io::Read;
use std::net::SocketAddr;
use std::time::Duration;

use courier_web::capability::{Capabilities, Csv, Json, Render, Representable};
use courier_web::{Error, FormBody, InMemorySessionStore, Route, Server, ServerConfig, event_channel};
use flate2::read::GzDecoder;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

struct Report {
    rows: Vec<(String, u32)>,
}

impl Render<Json> for Report {
    fn render(&self) -> Vec<u8> {
        let rows: Vec<_> = self.rows.iter().map(|(name, count)| serde_json::json!({ "name": name, "count": count })).collect();
        Json::to_vec(&rows)
    }
}

impl Render<Csv> for Report {
    fn render(&self) -> Vec<u8> {
        self.rows.iter().map(|(name, count)| format!("{name},{count}\n")).collect::<String>().into_bytes()
    }
}

impl Representable for Report {
    fn declare(caps: &mut Capabilities<Self>) {
        caps.satisfy::<Json>().satisfy::<Csv>();
    }
}

fn report() -> Report {
    Report { rows: vec![(String::from("ada"), 3), (String::from("grace"), 5)] }
}

async fn start(config: ServerConfig) -> SocketAddr {
    let reports = Route::<u32, (), Report>::new().get(|_req| Box::pin(async { Ok(report()) }));

    let text = Route::<u32, (), String>::new()
        .get(|_req| Box::pin(async { Ok("lorem ipsum ".repeat(200)) }))
        .head(|_req| Box::pin(async { Ok("lorem ipsum ".repeat(200)) }));

    let countdown = Route::<u32, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("ask for text/event-stream")) }))
        .event_stream(|_req| {
            let (mut emitter, stream) = event_channel::<u32>(4);
            tokio::spawn(async move {
                for n in (0..=20).rev() {
                    if emitter.send(n).await.is_err() {
                        return;
                    }
                }
            });
            stream
        });

    let echo = Route::<u32, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("upgrade to a websocket")) }))
        .duplex(|_req, mut inbound| {
            let (outbound, receiver) = mpsc::channel(8);
            tokio::spawn(async move {
                while let Some(message) = inbound.recv().await {
                    if outbound.send(format!("echo: {message}")).await.is_err() {
                        break;
                    }
                }
            });
            receiver
        });

    let signup = Route::<u32, FormBody, String>::new().post(|req| {
        Box::pin(async move {
            let Some(form) = req.take_body() else {
                return Err(Error::bad_request("empty form"));
            };
            let langs = form.values.get_all("lang").collect::<Vec<_>>().join("+");
            Ok(format!("{} likes {langs}", form.values.get("name").unwrap_or("nobody")))
        })
    });

    let server = Server::builder(InMemorySessionStore::new())
        .config(config)
        .route("/reports", reports)
        .unwrap()
        .route("/text", text)
        .unwrap()
        .route("/countdown", countdown)
        .unwrap()
        .route("/echo", echo)
        .unwrap()
        .route("/signup", signup)
        .unwrap()
        .build();

    serve(server).await
}

async fn serve(server: Server<u32>) -> SocketAddr {
    let listening = server.bind("127.0.0.1:0").await.unwrap();
    let addr = listening.local_addr().unwrap();
    tokio::spawn(listening.serve());
    addr
}

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl RawResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
    }

    fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn dechunk(mut raw: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    loop {
        let line_end = find(raw, b"\r\n").unwrap();
        let size = usize::from_str_radix(std::str::from_utf8(&raw[..line_end]).unwrap().trim(), 16).unwrap();
        raw = &raw[line_end + 2..];
        if size == 0 {
            return body;
        }
        body.extend_from_slice(&raw[..size]);
        raw = &raw[size + 2..];
    }
}

/// Sends one request on a fresh connection and reads until the server closes.
async fn exchange(addr: SocketAddr, request: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut received = Vec::new();
    stream.read_to_end(&mut received).await.unwrap();

    let head_end = find(&received, b"\r\n\r\n").unwrap();
    let head = std::str::from_utf8(&received[..head_end]).unwrap();
    let mut lines = head.split("\r\n");
    let status = lines.next().unwrap().split_whitespace().nth(1).unwrap().parse().unwrap();
    let headers = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.trim().to_owned(), value.trim().to_owned())
        })
        .collect::<Vec<_>>();

    let raw_body = &received[head_end + 4..];
    let mut response = RawResponse { status, headers, body: Vec::new() };
    response.body =
        if response.header("transfer-encoding") == Some("chunked") { dechunk(raw_body) } else { raw_body.to_vec() };
    response
}

fn get(path: &str, extra: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n{extra}\r\n")
}

#[tokio::test]
async fn json_is_chosen_over_csv() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, &get("/reports", "Accept: application/json\r\n")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.text(), r#"[{"count":3,"name":"ada"},{"count":5,"name":"grace"}]"#);

    let response = exchange(addr, &get("/reports", "Accept: text/html;q=0.9, csv\r\n")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ada,3\ngrace,5\n");

    let response = exchange(addr, &get("/reports", "Accept: text/html\r\n")).await;
    assert_eq!(response.status, 406);
}

#[tokio::test]
async fn gzip_is_preferred_by_position() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, &get("/text", "Accept-Encoding: gzip, br\r\n")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-encoding"), Some("gzip"));

    let mut decoded = String::new();
    GzDecoder::new(response.body.as_slice()).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "lorem ipsum ".repeat(200));
}

#[tokio::test]
async fn event_stream_counts_down() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, &get("/countdown", "Accept: text/event-stream\r\nAccept-Encoding: gzip\r\n")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("text/event-stream"));
    assert_eq!(response.header("cache-control"), Some("no-cache"));
    assert_eq!(response.header("content-encoding"), None);

    let text = response.text();
    let events: Vec<&str> = text.split("\n\n").filter(|event| !event.is_empty()).collect();
    let expected: Vec<String> = (0..=20).rev().map(|n| format!("data: {n}")).collect();
    assert_eq!(events, expected);
}

#[tokio::test]
async fn plain_get_on_stream_route_uses_handler() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, &get("/countdown", "")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ask for text/event-stream");
}

#[tokio::test]
async fn websocket_echoes_text() {
    let addr = start(ServerConfig::default()).await;

    let (mut socket, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/echo")).await.unwrap();
    assert_eq!(response.status(), 101);

    for word in ["one", "two", "three"] {
        socket.send(Message::text(word)).await.unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        assert_eq!(reply.into_text().unwrap().as_str(), format!("echo: {word}"));
    }

    socket.close(None).await.unwrap();
}

#[tokio::test]
async fn wrong_and_unknown_verbs() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, "DELETE /reports HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response.status, 405);
    assert_eq!(response.header("allow"), Some("GET"));

    let response = exchange(addr, "BREW /reports HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response.status, 501);

    let response = exchange(addr, &get("/nowhere", "")).await;
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn form_values_accumulate() {
    let addr = start(ServerConfig::default()).await;

    let body = "name=ada&lang=rust&lang=go";
    let request = format!(
        "POST /signup HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let response = exchange(addr, &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "ada likes rust+go");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let addr = start(ServerConfig { max_body_bytes: 8, ..ServerConfig::default() }).await;

    let body = "name=someone-with-a-long-name";
    let request = format!(
        "POST /signup HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
         Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let response = exchange(addr, &request).await;
    assert_eq!(response.status, 413);
}

#[tokio::test]
async fn head_is_answered_without_body() {
    let addr = start(ServerConfig::default()).await;

    let response = exchange(addr, "HEAD /text HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-length"), Some("2400"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn event_stream_producer_sees_client_leave() {
    let (left, mut gone) = mpsc::unbounded_channel();
    let waiting = Route::<u32, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("ask for text/event-stream")) }))
        .event_stream(move |req| {
            let cancelled = req.cancellation().clone();
            let left = left.clone();
            let (mut emitter, stream) = event_channel::<&'static str>(1);
            tokio::spawn(async move {
                if emitter.send("hello").await.is_err() {
                    return;
                }
                cancelled.cancelled().await;
                let _ = left.send(());
            });
            stream
        });
    let addr = serve(Server::builder(InMemorySessionStore::new()).route("/waiting", waiting).unwrap().build()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(get("/waiting", "Accept: text/event-stream\r\n").as_bytes()).await.unwrap();
    let mut received = Vec::new();
    let mut buf = [0u8; 512];
    while find(&received, b"data: hello").is_none() {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed before the first event");
        received.extend_from_slice(&buf[..n]);
    }
    drop(stream);

    timeout(Duration::from_secs(3), gone.recv()).await.unwrap().unwrap();
}

/// A duplex route that acknowledges every message and, once the inbound
/// side ends, reports what it saw and whether the request got cancelled.
async fn recording_socket() -> (SocketAddr, mpsc::UnboundedReceiver<(Vec<String>, bool)>) {
    let (report, reports) = mpsc::unbounded_channel();
    let socket = Route::<u32, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("upgrade to a websocket")) }))
        .duplex(move |req, mut inbound| {
            let cancelled = req.cancellation().clone();
            let report = report.clone();
            let (outbound, receiver) = mpsc::channel(8);
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(message) = inbound.recv().await {
                    let _ = outbound.send(format!("ack {message}")).await;
                    seen.push(message);
                }
                let cancelled = timeout(Duration::from_secs(3), cancelled.cancelled()).await.is_ok();
                let _ = report.send((seen, cancelled));
            });
            receiver
        });
    let addr = serve(Server::builder(InMemorySessionStore::new()).route("/socket", socket).unwrap().build()).await;
    (addr, reports)
}

#[tokio::test]
async fn dropped_socket_ends_inbound_and_cancels() {
    let (addr, mut reports) = recording_socket().await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket")).await.unwrap();
    for frame in ["1", "not-a-number", "3"] {
        socket.send(Message::text(frame)).await.unwrap();
        let reply = socket.next().await.unwrap().unwrap();
        assert_eq!(reply.into_text().unwrap().as_str(), format!("ack {frame}"));
    }
    // No close frame: the connection just goes away.
    drop(socket);

    let (seen, cancelled) = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
    assert_eq!(seen, ["1", "not-a-number", "3"]);
    assert!(cancelled);
}

#[tokio::test]
async fn closed_socket_ends_inbound_and_cancels() {
    let (addr, mut reports) = recording_socket().await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket")).await.unwrap();
    socket.send(Message::text("only")).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply.into_text().unwrap().as_str(), "ack only");
    socket.close(None).await.unwrap();

    let (seen, cancelled) = timeout(Duration::from_secs(5), reports.recv()).await.unwrap().unwrap();
    assert_eq!(seen, ["only"]);
    assert!(cancelled);
}
