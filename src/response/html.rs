use crate::response::Response;

impl Response {
    /// An HTML response with `Content-Length` set.
    pub fn html(body: impl Into<String>) -> Response {
        let body = body.into();
        Response::new()
            .with_header("content-type", "text/html")
            .with_header("content-length", &body.len().to_string())
            .with_body(body)
    }
}
