//! A tour of the engine.
//!
//! ```text
//! curl -H 'Accept: text/csv' http://127.0.0.1:8080/stats
//! curl -H 'Accept: text/event-stream' http://127.0.0.1:8080/countdown
//! curl -F name=ada -F file=@Cargo.toml http://127.0.0.1:8080/upload
//! websocat ws://127.0.0.1:8080/echo
//! ```

use std::time::Duration;

use courier_web::assets::StaticFiles;
use courier_web::capability::Capability;
use courier_web::{
    Capabilities, Csv, Error, Event, FormBody, Html, InMemorySessionStore, Json, Render, RequestContext,
    Representable, Route, Server, ServerError, event_channel, middleware_fn,
};
use tokio::sync::mpsc;

/// Page views of the current session.
type Views = u64;

struct Xml;

impl Capability for Xml {
    const CONTENT_TYPE: Option<&'static str> = Some("application/xml");
}

struct Stats {
    path: String,
    views: Views,
}

impl Render<Html> for Stats {
    fn render(&self) -> Vec<u8> {
        format!("<h1>{}</h1><p>{} views this session</p>", self.path, self.views).into_bytes()
    }
}

impl Render<Csv> for Stats {
    fn render(&self) -> Vec<u8> {
        format!("path,views\n{},{}\n", self.path, self.views).into_bytes()
    }
}

impl Render<Json> for Stats {
    fn render(&self) -> Vec<u8> {
        Json::to_vec(&serde_json::json!({ "path": self.path, "views": self.views }))
    }
}

impl Render<Xml> for Stats {
    fn render(&self) -> Vec<u8> {
        format!("<stats path=\"{}\" views=\"{}\"/>", self.path, self.views).into_bytes()
    }
}

impl Representable for Stats {
    fn declare(caps: &mut Capabilities<Self>) {
        caps.satisfy::<Html>().satisfy::<Csv>().satisfy::<Json>().satisfy::<Xml>();
    }
}

struct Problem {
    status: u16,
    message: String,
}

impl Render<Html> for Problem {
    fn render(&self) -> Vec<u8> {
        format!("<h1>{}</h1><p>{}</p>", self.status, self.message).into_bytes()
    }
}

impl Render<Json> for Problem {
    fn render(&self) -> Vec<u8> {
        Json::to_vec(&serde_json::json!({ "status": self.status, "message": self.message }))
    }
}

impl Representable for Problem {
    fn declare(caps: &mut Capabilities<Self>) {
        caps.satisfy::<Html>().satisfy::<Json>();
    }
}

fn count_view(ctx: &mut RequestContext<Views>) -> Result<(), Error> {
    let views = ctx.session_data().copied().unwrap_or(0) + 1;
    ctx.set_session(views);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let stats = Route::<Views, (), Stats>::new().get(|req| {
        Box::pin(async move {
            let views = req.session_data().copied().unwrap_or(0);
            Ok(Stats { path: req.path().to_owned(), views })
        })
    });

    let countdown = Route::<Views, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("send Accept: text/event-stream")) }))
        .event_stream(|req| {
            let cancelled = req.cancellation().clone();
            let (mut emitter, stream) = event_channel(4);
            tokio::spawn(async move {
                for n in (0..=20u32).rev() {
                    if emitter.send(Event::data(n.to_string()).id(n.to_string())).await.is_err() {
                        return;
                    }
                    tokio::select! {
                        () = cancelled.cancelled() => return,
                        () = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            });
            stream
        });

    let echo = Route::<Views, (), String>::new()
        .get(|_req| Box::pin(async { Ok(String::from("connect with a websocket client")) }))
        .duplex(|_req, mut inbound| {
            let (outbound, receiver) = mpsc::channel(16);
            tokio::spawn(async move {
                while let Some(message) = inbound.recv().await {
                    if outbound.send(message).await.is_err() {
                        break;
                    }
                }
            });
            receiver
        });

    let upload = Route::<Views, FormBody, String>::new().post(|req| {
        Box::pin(async move {
            let Some(form) = req.take_body() else {
                return Err(Error::bad_request("nothing uploaded"));
            };
            let mut summary = format!("hello {}\n", form.values.get("name").unwrap_or("stranger"));
            for file in &form.files {
                let name = file.file_name.as_deref().unwrap_or("unnamed");
                summary.push_str(&format!("{name}: {} bytes\n", file.data.len()));
            }
            Ok(summary)
        })
    });

    let server = Server::builder(InMemorySessionStore::new())
        .register_capability::<Xml>("xml")
        .middleware(middleware_fn(count_view))
        .error_handler(|_ctx, err| Problem { status: err.status().as_u16(), message: err.to_string() })
        .route("/stats", stats)?
        .route("/countdown", countdown)?
        .route("/echo", echo)?
        .route("/upload", upload)?
        .route("/static/{*path}", StaticFiles::new("public").into_route())?
        .build();

    let listening = server.bind("127.0.0.1:8080").await?;
    listening.serve().await;
    Ok(())
}
