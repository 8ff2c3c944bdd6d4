//! The per-route request lifecycle.
//!
//! Once the server has matched a path, loaded the session and resolved the
//! verb, a route endpoint takes over:
//!
//! 1. find the verb's handler, else `405` with `Allow`
//! 2. branch into a WebSocket or event stream when asked for and declared
//! 3. negotiate a representation, else `406`
//! 4. decode the body
//! 5. run server, then route middlewares
//! 6. run the handler, catching panics as `500`
//! 7. render, save the session, compress and write
//! 8. log the access
//!
//! Every failure goes through error delivery and is logged where it happens.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{HeaderValue, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;

use crate::body::ResponseBody;
use crate::capability::{CapabilityRegistry, Rendered, Representable, SatisfactionMap};
use crate::config::ServerConfig;
use crate::decode::{BodyParsers, DecodeBody, read_body};
use crate::encoding::encode_response;
use crate::error::{BoxError, Error, ErrorDelivery};
use crate::log::Logger;
use crate::middleware::MiddlewareChain;
use crate::request::{Request, RequestContext};
use crate::route::Route;
use crate::session::{SessionStore, save_session};
use crate::verb::Verb;
use crate::{sse, ws};

pub(crate) type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Server-wide state every request reads.
pub(crate) struct Shared<S> {
    pub(crate) store: Arc<dyn SessionStore<S>>,
    pub(crate) middlewares: MiddlewareChain<RequestContext<S>>,
    pub(crate) errors: ErrorDelivery<S>,
    pub(crate) logger: Arc<dyn Logger>,
    pub(crate) config: ServerConfig,
}

impl<S: Send + Sync + 'static> Shared<S> {
    /// Delivers `error` and logs both the failure and the access.
    pub(crate) fn fail(&self, mut ctx: RequestContext<S>, error: Error) -> Response<ResponseBody> {
        self.logger.log_error(&ctx.log_context(), &error);

        let status = error.status();
        let rendered = self.errors.render(&ctx, &error).unwrap_or_else(|| Rendered {
            body: ResponseBody::empty(),
            content_type: None,
            len: 0,
        });
        let response = self.finish(&mut ctx, status, rendered);
        self.log_access(&ctx, status);
        response
    }

    /// Builds the response from the context's headers and compresses it.
    pub(crate) fn finish(&self, ctx: &mut RequestContext<S>, status: StatusCode, rendered: Rendered) -> Response<ResponseBody> {
        ctx.record_response_bytes(rendered.len);

        let mut response = Response::new(rendered.body);
        *response.status_mut() = status;
        *response.headers_mut() = ctx.take_response_headers();

        if let Some(content_type) = rendered.content_type {
            match HeaderValue::from_str(content_type) {
                Ok(value) => {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                Err(e) => self.logger.log_error(&ctx.log_context(), &Error::internal(e)),
            }
        }

        encode_response(ctx.headers(), self.config.encodings(), &mut response);
        response
    }

    pub(crate) fn log_access(&self, ctx: &RequestContext<S>, status: StatusCode) {
        self.logger.log_request(&ctx.access_record(status));
    }
}

/// A route with everything computed at registration.
#[async_trait]
pub(crate) trait Endpoint<S>: Send + Sync {
    async fn dispatch(
        &self,
        shared: &Shared<S>,
        verb: Verb,
        ctx: RequestContext<S>,
        body: RequestBody,
    ) -> Response<ResponseBody>;
}

pub(crate) struct RouteEndpoint<S, B, T> {
    route: Route<S, B, T>,
    satisfaction: SatisfactionMap<T>,
    parsers: BodyParsers<B>,
    allow: Option<HeaderValue>,
}

impl<S, B, T> RouteEndpoint<S, B, T>
where
    S: Send + Sync + 'static,
    B: DecodeBody,
    T: Representable,
{
    pub(crate) fn new(route: Route<S, B, T>, registry: &CapabilityRegistry) -> Self {
        let allow = route.verbs().map(Verb::as_str).collect::<Vec<_>>().join(", ");
        Self {
            satisfaction: SatisfactionMap::compute(registry),
            parsers: BodyParsers::compute(),
            allow: HeaderValue::from_str(&allow).ok(),
            route,
        }
    }
}

#[async_trait]
impl<S, B, T> Endpoint<S> for RouteEndpoint<S, B, T>
where
    S: Send + Sync + 'static,
    B: DecodeBody,
    T: Representable,
{
    async fn dispatch(
        &self,
        shared: &Shared<S>,
        verb: Verb,
        mut ctx: RequestContext<S>,
        body: RequestBody,
    ) -> Response<ResponseBody> {
        let Some(handler) = self.route.handlers.get(&verb) else {
            if let Some(allow) = &self.allow {
                ctx.response_headers_mut().insert(ALLOW, allow.clone());
            }
            return shared.fail(ctx, Error::method_not_allowed());
        };

        if let Some(duplex) = &self.route.duplex
            && ws::wants_upgrade(&ctx)
        {
            let request = match self.prepare(shared, ctx, body).await {
                Ok(request) => request,
                Err(response) => return response,
            };
            return ws::upgrade(shared, duplex, request);
        }

        if let Some(producer) = &self.route.event_stream
            && sse::wants_event_stream(&ctx)
        {
            return sse::serve_event_stream(shared, &**producer, &self.parsers, ctx, body).await;
        }

        let Some(choice) = self.satisfaction.choose(ctx.headers()) else {
            return shared.fail(ctx, Error::not_acceptable());
        };

        let mut request = match self.prepare(shared, ctx, body).await {
            Ok(request) => request,
            Err(response) => return response,
        };

        let result = AssertUnwindSafe(handler.call(&mut request)).catch_unwind().await;
        let mut ctx = request.into_context();
        let value = match result {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return shared.fail(ctx, e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                shared.logger.log_panic(&ctx.log_context(), &message);
                return shared.fail(ctx, Error::internal(message));
            }
        };

        let rendered = self.satisfaction.render(&choice, value);
        save_session(shared.store.as_ref(), shared.logger.as_ref(), &shared.config, &mut ctx).await;

        let status = ctx.status();
        let response = shared.finish(&mut ctx, status, rendered);
        shared.log_access(&ctx, status);
        response
    }
}

impl<S, B, T> RouteEndpoint<S, B, T>
where
    S: Send + Sync + 'static,
    B: DecodeBody,
    T: Representable,
{
    /// Decodes the body and runs the middlewares.
    async fn prepare(
        &self,
        shared: &Shared<S>,
        mut ctx: RequestContext<S>,
        body: RequestBody,
    ) -> Result<Request<S, B>, Response<ResponseBody>> {
        let body = match read_body(&mut ctx, body, &self.parsers, &shared.config).await {
            Ok(body) => body,
            Err(e) => return Err(shared.fail(ctx, e)),
        };

        let mut request = Request::new(ctx, body);
        if let Err(e) = shared.middlewares.run(request.context_mut()).await {
            return Err(shared.fail(request.into_context(), e));
        }
        if let Err(e) = self.route.middlewares.run(&mut request).await {
            return Err(shared.fail(request.into_context(), e));
        }
        Ok(request)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("handler panicked")
    }
}
