//! A request dispatch engine on top of `courier-http`.
//!
//! A [`Server`] owns a route table of [`Route`]s. Each request goes through the
//! same lifecycle: session load, verb resolution, handler lookup, an optional
//! upgrade to an event stream or WebSocket, `Accept` negotiation, body
//! decoding, middlewares, the handler, compression and session save. Any
//! failure along the way is an [`Error`] carrying an HTTP status, rendered by
//! the server's error handler.
//!
//! ```no_run
//! use courier_web::{InMemorySessionStore, Route, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), courier_web::ServerError> {
//!     let hello = Route::<u32, (), String>::new().get(|req| {
//!         Box::pin(async move { Ok(format!("hello {}", req.param("name").unwrap_or("world"))) })
//!     });
//!
//!     let server = Server::builder(InMemorySessionStore::new()).route("/hello/{name}", hello)?.build();
//!     server.bind("127.0.0.1:8080").await?.serve().await;
//!     Ok(())
//! }
//! ```

mod body;
mod date;
mod dispatch;
mod encoding;
mod error;
mod request;
mod route;
mod server;
mod verb;
mod ws;

pub mod assets;
pub mod capability;
pub mod config;
pub mod decode;
pub mod log;
pub mod middleware;
pub mod negotiate;
pub mod session;
pub mod sse;

pub use body::ResponseBody;
pub use capability::{Capabilities, CapabilityRegistry, Csv, Html, Json, Render, Representable};
pub use config::ServerConfig;
pub use decode::{DecodeBody, FormBody, FormValues};
pub use error::{BoxError, Error};
pub use log::{Logger, TracingLogger};
pub use middleware::{Middleware, middleware_fn};
pub use negotiate::ContentEncoding;
pub use request::{Request, RequestContext};
pub use route::{Handler, HandlerFn, Route, handler_fn};
pub use server::{Listening, Server, ServerBuilder, ServerError};
pub use session::{InMemorySessionStore, Session, SessionStore, Sessionless};
pub use sse::{Event, EventEmitter, EventStream, event_channel};
pub use verb::Verb;
