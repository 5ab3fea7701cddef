use serde::Serialize;

use crate::response::Response;

impl Response {
    /// A JSON response serialized with serde.
    pub fn json<T: Serialize + ?Sized>(data: &T) -> Result<Response, serde_json::Error> {
        let body = serde_json::to_vec(data)?;
        Ok(Response::new()
            .with_header("content-type", "application/json")
            .with_header("content-length", &body.len().to_string())
            .with_body(body))
    }
}
