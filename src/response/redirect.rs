use crate::protocol::StatusCode;
use crate::response::Response;

impl Response {
    /// A redirect to `location`, status 302 Found.
    pub fn redirect(location: &str) -> Response {
        Response::new()
            .with_status(StatusCode::FOUND)
            .with_header("content-length", "0")
            .with_header("location", location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_status_and_location() {
        let response = Response::redirect("/next");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("location"), "/next");
        assert_eq!(response.headers().get("content-length"), "0");
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn serializes_with_empty_body() {
        let mut out: Vec<u8> = Vec::new();
        Response::redirect("/next").write(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("location: /next\r\n"));
        assert!(text.contains("content-length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
