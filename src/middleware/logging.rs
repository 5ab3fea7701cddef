//! Request logging middleware.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::handler::{ArcHandler, Handler, Middleware};
use crate::protocol::Request;
use crate::response::Response;

/// Logs method, target, status and latency for every request.
pub fn logging() -> Middleware {
    Box::new(|next| Arc::new(LoggingHandler { next }))
}

struct LoggingHandler {
    next: ArcHandler,
}

#[async_trait]
impl Handler for LoggingHandler {
    async fn call(&self, req: &mut Request) -> Response {
        let start = Instant::now();
        let method = req.method();
        let target = req.target().to_string();

        let response = self.next.call(req).await;

        info!(
            %method,
            target,
            status = response.status().as_u16(),
            elapsed = ?start.elapsed(),
            "handled request"
        );
        response
    }
}
