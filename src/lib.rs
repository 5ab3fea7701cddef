//! gale — a from-scratch HTTP/1.1 server
//!
//! The crate is built around three subsystems:
//!
//! - the **wire engine**: a request decoder and body codecs implemented
//!   as `tokio_util` codec state machines ([`codec`]), plus a
//!   three-phase response writer with chunked streaming and trailers
//!   ([`response`]);
//! - the **connection state machine**: one task per accepted connection
//!   handling keep-alive, timeouts, conditional responses and panic
//!   recovery ([`server`]);
//! - the **route-dispatch engine**: a prefix-tree router with parameter
//!   and wildcard segments, method matching and middleware chaining
//!   ([`router`]).
//!
//! ```no_run
//! use std::sync::Arc;
//! use gale::{handler_fn, Response, Router, Server, ServerOpts};
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let mut router = Router::new();
//!     router.get(
//!         "/hello/:name",
//!         handler_fn(|req| {
//!             let name = req.param("name").unwrap_or("world").to_string();
//!             Box::pin(async move { Response::text(format!("hello, {name}")) })
//!         }),
//!     );
//!
//!     let server = Server::serve(ServerOpts::default(), router.into_handler()).await?;
//!     println!("listening on {}", server.local_addr());
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod middleware;
pub mod protocol;
pub mod response;
pub mod router;
pub mod server;

mod handler;

pub use handler::{handler_fn, ArcHandler, Handler, HandlerFn, Middleware, Recovery};
pub use protocol::{
    Headers, HttpError, Method, ParseError, Query, Request, SendError, StatusCode,
};
pub use response::{BodySource, Response, StreamWriter, TrailerSetter};
pub use router::{CorsOptions, Router};
pub use server::{default_recovery, Server, ServerOpts};

pub(crate) use help::ensure;

mod help {

    macro_rules! ensure {
        ($predicate:expr, $error:expr) => {
            if !$predicate {
                return Err($error);
            }
        };
    }
    pub(crate) use ensure;
}
