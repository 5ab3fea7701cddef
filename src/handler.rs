//! Handler and middleware contracts
//!
//! A handler takes a request and returns a response; a middleware takes
//! a handler and returns a handler. Handlers are shared behind `Arc` and
//! must be callable concurrently from different connection tasks.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::protocol::Request;
use crate::response::Response;

/// An async request handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, req: &mut Request) -> Response;
}

/// A shared handler, as stored in route trees and middleware chains.
pub type ArcHandler = Arc<dyn Handler>;

/// A middleware wraps a handler in another handler.
pub type Middleware = Box<dyn Fn(ArcHandler) -> ArcHandler + Send + Sync>;

/// Maps a panic payload from a handler to the response that is written
/// before the connection closes.
pub type Recovery = Arc<dyn Fn(Box<dyn Any + Send>) -> Response + Send + Sync>;

/// Adapts a closure returning a boxed future into a [`Handler`].
///
/// ```no_run
/// use gale::{handler_fn, Response};
///
/// let handler = handler_fn(|req| {
///     let who = req.param("name").unwrap_or("world").to_string();
///     Box::pin(async move { Response::text(format!("hello, {who}")) })
/// });
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Response> + Send + Sync,
{
    HandlerFn { f }
}

/// See [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Response> + Send + Sync,
{
    async fn call(&self, req: &mut Request) -> Response {
        (self.f)(req).await
    }
}
