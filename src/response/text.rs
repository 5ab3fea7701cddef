use crate::response::Response;

impl Response {
    /// A plain-text response with `Content-Length` set.
    pub fn text(body: impl Into<String>) -> Response {
        let body = body.into();
        Response::new()
            .with_header("content-type", "text/plain")
            .with_header("content-length", &body.len().to_string())
            .with_body(body)
    }
}
