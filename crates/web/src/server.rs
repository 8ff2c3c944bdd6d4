//! The server: route table, server-wide state and the accept loop.
//!
//! Everything is registered through [`ServerBuilder`]; a built [`Server`] is
//! immutable and shared by every connection.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use courier_http::connection::HttpConnection;
use courier_http::handler::Handler;
use courier_http::protocol::body::ReqBody;
use http::{Request, Response};
use http_body::Body;
use http_body_util::BodyExt;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::body::ResponseBody;
use crate::capability::{Capability, CapabilityRegistry, Representable};
use crate::config::ServerConfig;
use crate::date::DateService;
use crate::decode::DecodeBody;
use crate::dispatch::{Endpoint, RequestBody, RouteEndpoint, Shared};
use crate::error::{BoxError, Error, ErrorDelivery};
use crate::log::{Logger, TracingLogger};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::request::RequestContext;
use crate::route::Route;
use crate::session::{SessionStore, load_session};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid route `{path}`: {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("failed to bind: {0}")]
    Bind(#[from] io::Error),
}

pub struct ServerBuilder<S> {
    registry: CapabilityRegistry,
    routes: matchit::Router<Box<dyn Endpoint<S>>>,
    store: Arc<dyn SessionStore<S>>,
    middlewares: MiddlewareChain<RequestContext<S>>,
    errors: ErrorDelivery<S>,
    logger: Arc<dyn Logger>,
    config: ServerConfig,
}

impl<S: Send + Sync + 'static> ServerBuilder<S> {
    fn new(store: impl SessionStore<S> + 'static) -> Self {
        Self {
            registry: CapabilityRegistry::default(),
            routes: matchit::Router::new(),
            store: Arc::new(store),
            middlewares: MiddlewareChain::new(),
            errors: ErrorDelivery::status_only(),
            logger: Arc::new(TracingLogger),
            config: ServerConfig::default(),
        }
    }

    /// Maps an Accept token to `C`.
    ///
    /// Only routes and error handlers registered afterwards see the token.
    #[must_use]
    pub fn register_capability<C: Capability>(mut self, token: impl Into<String>) -> Self {
        self.registry.register::<C>(token);
        self
    }

    /// Appends a middleware that runs for every routed request.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware<RequestContext<S>> + 'static) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Renders failures as `T`, negotiated like any other response.
    #[must_use]
    pub fn error_handler<T, F>(mut self, handler: F) -> Self
    where
        T: Representable,
        F: Fn(&RequestContext<S>, &Error) -> T + Send + Sync + 'static,
    {
        self.errors = ErrorDelivery::with_handler(&self.registry, handler);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds `route` under a `matchit` pattern such as `/users/{id}` or
    /// `/static/{*path}`.
    pub fn route<B, T>(mut self, path: &str, route: Route<S, B, T>) -> Result<Self, ServerError>
    where
        B: DecodeBody,
        T: Representable,
    {
        let endpoint = RouteEndpoint::new(route, &self.registry);
        self.routes
            .insert(path, Box::new(endpoint))
            .map_err(|source| ServerError::InvalidRoute { path: path.to_owned(), source })?;
        Ok(self)
    }

    pub fn build(self) -> Server<S> {
        Server {
            routes: self.routes,
            shared: Shared {
                store: self.store,
                middlewares: self.middlewares,
                errors: self.errors,
                logger: self.logger,
                config: self.config,
            },
            date: OnceCell::new(),
        }
    }
}

impl<S> fmt::Debug for ServerBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("registry", &self.registry)
            .field("middlewares", &self.middlewares)
            .field("errors", &self.errors)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub struct Server<S> {
    routes: matchit::Router<Box<dyn Endpoint<S>>>,
    shared: Shared<S>,
    date: OnceCell<DateService>,
}

impl<S: Send + Sync + 'static> Server<S> {
    pub fn builder(store: impl SessionStore<S> + 'static) -> ServerBuilder<S> {
        ServerBuilder::new(store)
    }

    fn lookup(&self, path: &str) -> Option<(&dyn Endpoint<S>, Vec<(String, String)>)> {
        let matched = self.routes.at(path).ok()?;
        let params = matched.params.iter().map(|(name, value)| (name.to_owned(), value.to_owned())).collect();
        Some((&**matched.value, params))
    }

    /// Runs one request through the lifecycle.
    ///
    /// Never fails: every error is delivered as a response.
    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let body: RequestBody = body.map_err(Into::into).boxed_unsync();

        let mut response = match self.lookup(parts.uri.path()) {
            None => self.shared.fail(RequestContext::new(parts, Vec::new()), Error::not_found()),
            Some((endpoint, params)) => {
                let mut ctx = RequestContext::new(parts, params);
                load_session(self.shared.store.as_ref(), self.shared.logger.as_ref(), &mut ctx).await;

                match ctx.verb() {
                    Some(verb) => endpoint.dispatch(&self.shared, verb, ctx, body).await,
                    None => self.shared.fail(ctx, Error::not_implemented()),
                }
            }
        };

        self.date.get_or_init(DateService::new).insert_date(response.headers_mut());
        response
    }

    /// Binds a listener; call [`Listening::serve`] to accept connections.
    pub async fn bind(self, addr: impl ToSocketAddrs) -> Result<Listening<S>, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Listening { listener, server: Arc::new(self) })
    }
}

impl<S> fmt::Debug for Server<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("errors", &self.shared.errors)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Handler for Server<S> {
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        Ok(self.dispatch(req).await)
    }
}

/// A bound server, ready to accept.
pub struct Listening<S> {
    listener: TcpListener,
    server: Arc<Server<S>>,
}

impl<S: Send + Sync + 'static> Listening<S> {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the task is dropped, one task per connection.
    pub async fn serve(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("global tracing subscriber already set");
        }

        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "start listening"),
            Err(e) => warn!(cause = %e, "listening on unknown address"),
        }

        loop {
            let (tcp_stream, remote_addr) = match self.listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let server = Arc::clone(&self.server);
            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::new(reader, writer);
                match connection.process(server).await {
                    Ok(()) => debug!(%remote_addr, "connection shutdown"),
                    Err(e) => error!(%remote_addr, cause = %e, "connection failed"),
                }
            });
        }
    }
}

impl<S> fmt::Debug for Listening<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listening").field("listener", &self.listener).finish_non_exhaustive()
    }
}
