//! Routes: per-verb handlers, route middlewares and upgrade handlers for one
//! path pattern.
//!
//! ```
//! use courier_web::{Error, Request, Route};
//!
//! let route: Route<(), (), String> = Route::new()
//!     .get(|req: &mut Request<(), ()>| {
//!         Box::pin(async move { Ok(format!("hello from {}", req.path())) })
//!     })
//!     .delete(|_req| Box::pin(async { Err(Error::not_implemented()) }));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::body::ResponseBody;
use crate::error::Error;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::request::Request;
use crate::sse::{EventStream, IntoEvent};
use crate::verb::Verb;

/// Turns a request into a response value of type `T`.
#[async_trait]
pub trait Handler<S, B, T>: Send + Sync {
    async fn call(&self, req: &mut Request<S, B>) -> Result<T, Error>;
}

pub struct HandlerFn<F, S, B, T> {
    f: F,
    _marker: PhantomData<fn(&mut Request<S, B>) -> T>,
}

impl<F, S, B, T> fmt::Debug for HandlerFn<F, S, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, S, B, T> Handler<S, B, T> for HandlerFn<F, S, B, T>
where
    F: for<'a> Fn(&'a mut Request<S, B>) -> BoxFuture<'a, Result<T, Error>> + Send + Sync,
    S: Send + 'static,
    B: Send + 'static,
    T: Send + 'static,
{
    async fn call(&self, req: &mut Request<S, B>) -> Result<T, Error> {
        (self.f)(req).await
    }
}

/// Adapts a closure returning a boxed future as a [`Handler`].
pub fn handler_fn<F, S, B, T>(f: F) -> HandlerFn<F, S, B, T>
where
    F: for<'a> Fn(&'a mut Request<S, B>) -> BoxFuture<'a, Result<T, Error>>,
{
    HandlerFn { f, _marker: PhantomData }
}

pub(crate) type EventProducer<S, B> = dyn Fn(&mut Request<S, B>) -> ResponseBody + Send + Sync;

pub(crate) type DuplexHandler<S, B> =
    dyn Fn(Request<S, B>, mpsc::Receiver<String>) -> mpsc::Receiver<String> + Send + Sync;

/// Handlers for one path pattern.
///
/// `S` is the session data, `B` the request body type and `T` the response
/// type shared by all of the route's handlers.
pub struct Route<S, B, T> {
    pub(crate) handlers: BTreeMap<Verb, Box<dyn Handler<S, B, T>>>,
    pub(crate) middlewares: MiddlewareChain<Request<S, B>>,
    pub(crate) event_stream: Option<Box<EventProducer<S, B>>>,
    pub(crate) duplex: Option<Arc<DuplexHandler<S, B>>>,
}

macro_rules! verb_methods {
    ($($(#[$doc:meta])* $name:ident => $verb:expr;)*) => {
        $(
            $(#[$doc])*
            #[must_use]
            pub fn $name<F>(self, f: F) -> Self
            where
                F: for<'a> Fn(&'a mut Request<S, B>) -> BoxFuture<'a, Result<T, Error>> + Send + Sync + 'static,
            {
                self.handle($verb, handler_fn(f))
            }
        )*
    };
}

impl<S, B, T> Route<S, B, T>
where
    S: Send + Sync + 'static,
    B: Send + 'static,
    T: Send + 'static,
{
    pub fn new() -> Self {
        Self { handlers: BTreeMap::new(), middlewares: MiddlewareChain::new(), event_stream: None, duplex: None }
    }

    /// Binds `handler` to `verb`, replacing an earlier one.
    #[must_use]
    pub fn handle(mut self, verb: Verb, handler: impl Handler<S, B, T> + 'static) -> Self {
        self.handlers.insert(verb, Box::new(handler));
        self
    }

    verb_methods! {
        get => Verb::Get;
        post => Verb::Post;
        put => Verb::Put;
        delete => Verb::Delete;
        head => Verb::Head;
        options => Verb::Options;
        connect => Verb::Connect;
        trace => Verb::Trace;
        patch => Verb::Patch;
    }

    /// Runs after the server middlewares, with the decoded body available.
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware<Request<S, B>> + 'static) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Answers `Accept: text/event-stream` requests with the producer's events.
    ///
    /// Route middlewares do not run for event streams.
    #[must_use]
    pub fn event_stream<E, F>(mut self, producer: F) -> Self
    where
        E: IntoEvent + Send + 'static,
        F: Fn(&mut Request<S, B>) -> EventStream<E> + Send + Sync + 'static,
    {
        self.event_stream = Some(Box::new(move |req: &mut Request<S, B>| producer(req).into_body()));
        self
    }

    /// Upgrades `Upgrade: websocket` requests to a duplex text socket.
    ///
    /// The handler gets the inbound messages and returns the outbound ones;
    /// the socket closes once the outbound channel does.
    #[must_use]
    pub fn duplex<F>(mut self, handler: F) -> Self
    where
        F: Fn(Request<S, B>, mpsc::Receiver<String>) -> mpsc::Receiver<String> + Send + Sync + 'static,
    {
        self.duplex = Some(Arc::new(handler));
        self
    }

    pub fn verbs(&self) -> impl Iterator<Item = Verb> + '_ {
        self.handlers.keys().copied()
    }
}

impl<S, B, T> Default for Route<S, B, T>
where
    S: Send + Sync + 'static,
    B: Send + 'static,
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, B, T> fmt::Debug for Route<S, B, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("verbs", &self.handlers.keys().collect::<Vec<_>>())
            .field("middlewares", &self.middlewares)
            .field("event_stream", &self.event_stream.is_some())
            .field("duplex", &self.duplex.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    fn request() -> Request<(), String> {
        let (parts, ()) = http::Request::builder().uri("/echo").body(()).unwrap().into_parts();
        Request::new(crate::request::RequestContext::new(parts, Vec::new()), Some(String::from("ping")))
    }

    struct Shout;

    #[async_trait]
    impl Handler<(), String, String> for Shout {
        async fn call(&self, req: &mut Request<(), String>) -> Result<String, Error> {
            req.body().map(|body| body.to_uppercase()).ok_or_else(|| Error::bad_request("no body"))
        }
    }

    #[tokio::test]
    async fn closures_and_handlers_share_a_route() {
        let route: Route<(), String, String> = Route::new()
            .get(|req| {
                Box::pin(async move {
                    req.set_status(StatusCode::ACCEPTED);
                    Ok(req.take_body().unwrap_or_default())
                })
            })
            .handle(Verb::Post, Shout);

        assert_eq!(route.verbs().collect::<Vec<_>>(), [Verb::Get, Verb::Post]);

        let mut req = request();
        let echoed = route.handlers[&Verb::Get].call(&mut req).await.unwrap();
        assert_eq!(echoed, "ping");
        assert_eq!(req.status(), StatusCode::ACCEPTED);

        let mut req = request();
        assert_eq!(route.handlers[&Verb::Post].call(&mut req).await.unwrap(), "PING");
    }
}
