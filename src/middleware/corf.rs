//! Cross-origin request forgery protection
//!
//! Unsafe-method requests are only allowed when they are same-origin,
//! from an explicitly trusted origin, or marked `same-origin`/`none` by
//! `Sec-Fetch-Site`. Everything else is handed to the deny handler
//! (default: 403 with an empty body).
//!
//! The trusted-origin set can grow while the server runs; it is guarded
//! by a read/write lock, and the deny handler sits in its own swappable
//! slot.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::handler::{ArcHandler, Handler, Middleware};
use crate::protocol::{Method, Request, StatusCode};
use crate::response::Response;

/// Origins must be `scheme://host`, nothing more.
#[derive(Debug, Error)]
#[error("invalid origin {origin:?}: {reason}")]
pub struct OriginError {
    origin: String,
    reason: &'static str,
}

fn validate_origin(origin: &str) -> Result<(), OriginError> {
    let err = |reason| OriginError { origin: origin.to_string(), reason };

    let Some((scheme, host)) = origin.split_once("://") else {
        return Err(err("scheme is required"));
    };
    if scheme.is_empty() {
        return Err(err("scheme is required"));
    }
    if host.is_empty() {
        return Err(err("host is required"));
    }
    if host.contains('/') || host.contains('?') || host.contains('#') {
        return Err(err("path, query, and fragment are not allowed"));
    }
    Ok(())
}

fn origin_host(origin: &str) -> Option<&str> {
    origin.split_once("://").map(|(_, host)| host)
}

fn is_safe_method(method: Method) -> bool {
    matches!(method, Method::Get | Method::Head | Method::Options | Method::Trace)
}

/// The CORF guard. Wrap routes with [`Corf::middleware`].
pub struct Corf {
    trusted_origins: RwLock<HashSet<String>>,
    deny: RwLock<Option<ArcHandler>>,
}

impl Corf {
    /// Builds a guard trusting the given origins. Each origin is
    /// validated up front.
    pub fn new<I, S>(trusted_origins: I) -> Result<Arc<Corf>, OriginError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = HashSet::new();
        for origin in trusted_origins {
            let origin = origin.into();
            validate_origin(&origin)?;
            set.insert(origin);
        }
        Ok(Arc::new(Corf { trusted_origins: RwLock::new(set), deny: RwLock::new(None) }))
    }

    /// Adds a trusted origin at runtime.
    pub fn add_trusted_origin(&self, origin: &str) -> Result<(), OriginError> {
        validate_origin(origin)?;
        self.trusted_origins
            .write()
            .expect("trusted origin set lock")
            .insert(origin.to_string());
        Ok(())
    }

    /// Swaps the deny handler; `None` restores the 403 default.
    pub fn set_deny_handler(&self, handler: Option<ArcHandler>) {
        *self.deny.write().expect("deny handler lock") = handler;
    }

    /// The middleware enforcing this guard.
    pub fn middleware(self: Arc<Self>) -> Middleware {
        Box::new(move |next| Arc::new(CorfHandler { corf: Arc::clone(&self), next }))
    }

    fn is_trusted(&self, origin: &str) -> bool {
        !origin.is_empty()
            && self.trusted_origins.read().expect("trusted origin set lock").contains(origin)
    }

    async fn deny(&self, req: &mut Request) -> Response {
        let deny = self.deny.read().expect("deny handler lock").clone();
        match deny {
            Some(handler) => handler.call(req).await,
            None => Response::new().with_status(StatusCode::FORBIDDEN),
        }
    }
}

struct CorfHandler {
    corf: Arc<Corf>,
    next: ArcHandler,
}

#[async_trait]
impl Handler for CorfHandler {
    async fn call(&self, req: &mut Request) -> Response {
        if is_safe_method(req.method()) {
            return self.next.call(req).await;
        }

        let origin = req.headers().get("origin").to_string();
        if self.corf.is_trusted(&origin) {
            return self.next.call(req).await;
        }

        let sec_fetch_site = req.headers().get("sec-fetch-site").to_lowercase();
        if !sec_fetch_site.is_empty() {
            if sec_fetch_site == "same-origin" || sec_fetch_site == "none" {
                return self.next.call(req).await;
            }
            return self.corf.deny(req).await;
        }

        if origin.is_empty() {
            return self.next.call(req).await;
        }

        let host = req.headers().get("host").to_string();
        if origin_host(&origin) == Some(host.as_str()) {
            return self.next.call(req).await;
        }

        self.corf.deny(req).await
    }
}
