//! CORS policy engine
//!
//! Computes the response headers for preflight (`OPTIONS` +
//! `Access-Control-Request-Method`) and actual cross-origin requests.
//! The router decides when to consult it and how to merge the result.

use std::sync::Arc;

use crate::protocol::{Method, Request};

/// Custom origin validator; overrides the origin list entirely.
pub type AllowOriginFn = Arc<dyn Fn(&Request, &str) -> bool + Send + Sync>;

/// Configuration for the router's CORS handling.
#[derive(Clone, Default)]
pub struct CorsOptions {
    /// Origins allowed to make cross-origin requests. `"*"` allows all.
    /// An origin may contain one `*` wildcard replacing any run of
    /// characters (e.g. `http://*.example.com`). Empty means all origins
    /// (unless `allow_origin_fn` is set).
    pub allowed_origins: Vec<String>,

    /// Overrides `allowed_origins` when set.
    pub allow_origin_fn: Option<AllowOriginFn>,

    /// Methods allowed for cross-origin requests. Empty means the simple
    /// methods `GET, POST, HEAD`.
    pub allowed_methods: Vec<String>,

    /// Headers the client may send. `"*"` allows all. `Origin` is always
    /// allowed; empty also allows `Accept` and `Content-Type`.
    pub allowed_headers: Vec<String>,

    /// Headers exposed to the client-side API.
    pub exposed_headers: Vec<String>,

    /// Whether credentialed requests are allowed.
    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds; 0 omits the header.
    pub max_age: u32,

    /// Let a matching `OPTIONS` or any-method route handle the preflight
    /// request instead of answering 204 directly.
    pub options_passthrough: bool,
}

/// A single-`*` origin pattern.
struct WildcardOrigin {
    prefix: String,
    suffix: String,
}

impl WildcardOrigin {
    fn matches(&self, origin: &str) -> bool {
        origin.len() >= self.prefix.len() + self.suffix.len()
            && origin.starts_with(&self.prefix)
            && origin.ends_with(&self.suffix)
    }
}

pub(crate) struct CorsHandler {
    allowed_origins: Vec<String>,
    allowed_wildcard_origins: Vec<WildcardOrigin>,
    allow_origin_fn: Option<AllowOriginFn>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<String>,
    exposed_headers: Vec<String>,
    max_age: u32,
    allowed_origins_all: bool,
    allowed_headers_all: bool,
    allow_credentials: bool,
    pub(crate) options_passthrough: bool,
}

impl CorsHandler {
    pub(crate) fn new(options: CorsOptions) -> Self {
        let mut handler = CorsHandler {
            allowed_origins: Vec::new(),
            allowed_wildcard_origins: Vec::new(),
            allow_origin_fn: options.allow_origin_fn,
            allowed_headers: Vec::new(),
            allowed_methods: Vec::new(),
            exposed_headers: options.exposed_headers,
            max_age: options.max_age,
            allowed_origins_all: false,
            allowed_headers_all: false,
            allow_credentials: options.allow_credentials,
            options_passthrough: options.options_passthrough,
        };

        if options.allowed_origins.is_empty() {
            if handler.allow_origin_fn.is_none() {
                handler.allowed_origins_all = true;
            }
        } else {
            for origin in &options.allowed_origins {
                let origin = origin.to_lowercase();
                if origin == "*" {
                    handler.allowed_origins_all = true;
                    handler.allowed_origins.clear();
                    handler.allowed_wildcard_origins.clear();
                    break;
                } else if let Some(star) = origin.find('*') {
                    handler.allowed_wildcard_origins.push(WildcardOrigin {
                        prefix: origin[..star].to_string(),
                        suffix: origin[star + 1..].to_string(),
                    });
                } else {
                    handler.allowed_origins.push(origin);
                }
            }
        }

        if options.allowed_headers.is_empty() {
            handler.allowed_headers =
                vec!["origin".to_string(), "accept".to_string(), "content-type".to_string()];
        } else if options.allowed_headers.iter().any(|h| h == "*") {
            handler.allowed_headers_all = true;
        } else {
            handler.allowed_headers =
                options.allowed_headers.iter().map(|h| h.to_lowercase()).collect();
            handler.allowed_headers.push("origin".to_string());
        }

        if options.allowed_methods.is_empty() {
            handler.allowed_methods =
                vec!["GET".to_string(), "POST".to_string(), "HEAD".to_string()];
        } else {
            handler.allowed_methods =
                options.allowed_methods.iter().map(|m| m.to_uppercase()).collect();
        }

        handler
    }

    /// Headers for an `OPTIONS` preflight probe.
    pub(crate) fn handle_preflight(&self, req: &Request) -> crate::protocol::Headers {
        let mut headers = crate::protocol::Headers::new();
        let origin = req.headers().get("origin").to_string();

        if req.method() != Method::Options {
            return headers;
        }

        headers.add("Vary", "Origin");
        headers.add("Vary", "Access-Control-Request-Method");
        headers.add("Vary", "Access-Control-Request-Headers");

        if !self.is_origin_allowed(req, &origin) {
            return headers;
        }

        let request_method = req.headers().get("access-control-request-method").to_string();
        if !self.is_method_allowed(&request_method) {
            return headers;
        }

        let request_headers = parse_header_list(req.headers().get("access-control-request-headers"));
        if !self.are_headers_allowed(&request_headers) {
            return headers;
        }

        if self.allowed_origins_all {
            headers.set("Access-Control-Allow-Origin", "*");
        } else {
            headers.set("Access-Control-Allow-Origin", &origin);
        }
        headers.set("Access-Control-Allow-Methods", &request_method.to_uppercase());
        if !request_headers.is_empty() {
            headers.set("Access-Control-Allow-Headers", &request_headers.join(", "));
        }
        if self.allow_credentials {
            headers.set("Access-Control-Allow-Credentials", "true");
        }
        if self.max_age > 0 {
            headers.set("Access-Control-Max-Age", &self.max_age.to_string());
        }

        headers
    }

    /// Headers merged onto the response of an actual cross-origin request.
    pub(crate) fn handle_actual_request(&self, req: &Request) -> crate::protocol::Headers {
        let mut headers = crate::protocol::Headers::new();
        let origin = req.headers().get("origin").to_string();

        headers.add("Vary", "Origin");

        if origin.is_empty() {
            return headers;
        }
        if !self.is_origin_allowed(req, &origin) {
            return headers;
        }
        if !self.is_method_allowed(req.method().as_str()) {
            return headers;
        }

        if self.allowed_origins_all {
            headers.set("Access-Control-Allow-Origin", "*");
        } else {
            headers.set("Access-Control-Allow-Origin", &origin);
        }
        if !self.exposed_headers.is_empty() {
            headers.set("Access-Control-Expose-Headers", &self.exposed_headers.join(", "));
        }
        if self.allow_credentials {
            headers.set("Access-Control-Allow-Credentials", "true");
        }

        headers
    }

    fn is_origin_allowed(&self, req: &Request, origin: &str) -> bool {
        if let Some(allow) = &self.allow_origin_fn {
            return allow(req, origin);
        }
        if self.allowed_origins_all {
            return true;
        }

        let origin = origin.to_lowercase();
        if self.allowed_origins.iter().any(|o| *o == origin) {
            return true;
        }
        self.allowed_wildcard_origins.iter().any(|w| w.matches(&origin))
    }

    fn is_method_allowed(&self, method: &str) -> bool {
        let method = method.to_uppercase();
        if method == Method::Options.as_str() {
            // preflight is always allowed
            return true;
        }
        self.allowed_methods.iter().any(|m| *m == method)
    }

    fn are_headers_allowed(&self, requested: &[String]) -> bool {
        if self.allowed_headers_all || requested.is_empty() {
            return true;
        }
        requested
            .iter()
            .all(|header| self.allowed_headers.iter().any(|h| *h == header.to_lowercase()))
    }
}

fn parse_header_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Method;

    fn preflight_request(origin: &str, method: &str) -> Request {
        let mut req = Request::synthetic(Method::Options, "/resource");
        req.headers_mut().add("Origin", origin);
        req.headers_mut().add("Access-Control-Request-Method", method);
        req
    }

    #[test]
    fn default_allows_all_origins() {
        let cors = CorsHandler::new(CorsOptions::default());
        let req = preflight_request("http://example.com", "GET");

        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "*");
        assert_eq!(headers.get("access-control-allow-methods"), "GET");
        assert_eq!(
            headers.get("vary"),
            "Origin, Access-Control-Request-Method, Access-Control-Request-Headers"
        );
    }

    #[test]
    fn listed_origin_is_echoed() {
        let cors = CorsHandler::new(CorsOptions {
            allowed_origins: vec!["http://example.com".to_string()],
            ..Default::default()
        });
        let req = preflight_request("http://example.com", "POST");

        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "http://example.com");
    }

    #[test]
    fn unlisted_origin_gets_no_allow_headers() {
        let cors = CorsHandler::new(CorsOptions {
            allowed_origins: vec!["http://example.com".to_string()],
            ..Default::default()
        });
        let req = preflight_request("http://evil.com", "GET");

        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "");
        // vary headers are always present
        assert!(!headers.get("vary").is_empty());
    }

    #[test]
    fn wildcard_origin_pattern() {
        let cors = CorsHandler::new(CorsOptions {
            allowed_origins: vec!["http://*.example.com".to_string()],
            ..Default::default()
        });

        let req = preflight_request("http://api.example.com", "GET");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "http://api.example.com");

        let req = preflight_request("http://example.org", "GET");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "");
    }

    #[test]
    fn disallowed_method_gets_no_allow_headers() {
        let cors = CorsHandler::new(CorsOptions::default());
        let req = preflight_request("http://example.com", "DELETE");

        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "");
    }

    #[test]
    fn requested_headers_are_checked() {
        let cors = CorsHandler::new(CorsOptions::default());

        let mut req = preflight_request("http://example.com", "GET");
        req.headers_mut().add("Access-Control-Request-Headers", "Content-Type, Accept");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-headers"), "Content-Type, Accept");

        let mut req = preflight_request("http://example.com", "GET");
        req.headers_mut().add("Access-Control-Request-Headers", "X-Secret");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "");
    }

    #[test]
    fn credentials_and_max_age() {
        let cors = CorsHandler::new(CorsOptions {
            allow_credentials: true,
            max_age: 600,
            ..Default::default()
        });
        let req = preflight_request("http://example.com", "GET");

        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-credentials"), "true");
        assert_eq!(headers.get("access-control-max-age"), "600");
    }

    #[test]
    fn actual_request_headers() {
        let cors = CorsHandler::new(CorsOptions {
            exposed_headers: vec!["X-Total".to_string()],
            ..Default::default()
        });

        let mut req = Request::synthetic(Method::Get, "/resource");
        req.headers_mut().add("Origin", "http://example.com");

        let headers = cors.handle_actual_request(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "*");
        assert_eq!(headers.get("access-control-expose-headers"), "X-Total");
        assert_eq!(headers.get("vary"), "Origin");
    }

    #[test]
    fn actual_request_without_origin_only_varies() {
        let cors = CorsHandler::new(CorsOptions::default());
        let req = Request::synthetic(Method::Get, "/resource");

        let headers = cors.handle_actual_request(&req);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("vary"), "Origin");
    }

    #[test]
    fn allow_origin_fn_overrides_list() {
        let cors = CorsHandler::new(CorsOptions {
            allowed_origins: vec!["http://listed.com".to_string()],
            allow_origin_fn: Some(Arc::new(|_req, origin| origin.ends_with(".trusted.dev"))),
            ..Default::default()
        });

        let req = preflight_request("http://app.trusted.dev", "GET");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "http://app.trusted.dev");

        let req = preflight_request("http://listed.com", "GET");
        let headers = cors.handle_preflight(&req);
        assert_eq!(headers.get("access-control-allow-origin"), "");
    }
}
