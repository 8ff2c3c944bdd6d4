use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::Error;

/// Runs before the handler and may reject the request.
///
/// Server-level middlewares see a [`RequestContext`](crate::RequestContext);
/// route-level ones see the [`Request`](crate::Request) with its decoded body.
#[async_trait]
pub trait Middleware<R>: Send + Sync {
    async fn handle(&self, req: &mut R) -> Result<(), Error>;
}

/// Ordered middlewares; the first error stops the chain.
pub struct MiddlewareChain<R> {
    inner: Vec<Box<dyn Middleware<R>>>,
}

impl<R: Send> MiddlewareChain<R> {
    pub fn new() -> Self {
        Self { inner: Vec::new() }
    }

    pub fn push(&mut self, middleware: impl Middleware<R> + 'static) {
        self.inner.push(Box::new(middleware));
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Side effects of the middlewares that ran before a failure stay.
    pub async fn run(&self, req: &mut R) -> Result<(), Error> {
        for middleware in &self.inner {
            middleware.handle(req).await?;
        }
        Ok(())
    }
}

impl<R: Send> Default for MiddlewareChain<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for MiddlewareChain<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareChain").field("len", &self.inner.len()).finish()
    }
}

pub struct MiddlewareFn<F, R> {
    f: F,
    _marker: PhantomData<fn(&mut R)>,
}

impl<F, R> fmt::Debug for MiddlewareFn<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, R> Middleware<R> for MiddlewareFn<F, R>
where
    R: Send,
    F: Fn(&mut R) -> Result<(), Error> + Send + Sync,
{
    async fn handle(&self, req: &mut R) -> Result<(), Error> {
        (self.f)(req)
    }
}

/// Wraps a synchronous closure as a [`Middleware`].
pub fn middleware_fn<F, R>(f: F) -> MiddlewareFn<F, R>
where
    F: Fn(&mut R) -> Result<(), Error>,
{
    MiddlewareFn { f, _marker: PhantomData }
}
