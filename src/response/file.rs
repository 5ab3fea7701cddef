use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use tokio::fs::File;

use crate::response::{BodySource, Response};

impl Response {
    /// A response serving a file from disk.
    ///
    /// When metadata is available the response carries `Content-Length`,
    /// a content type guessed from the extension, and a weak `ETag`
    /// derived from mtime and size (which pairs with the connection's
    /// `If-None-Match` handling). Without usable metadata the body falls
    /// back to chunked framing.
    pub async fn file(path: impl AsRef<Path>) -> io::Result<Response> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let content_type = content_type_for(path);

        let mut response = Response::new().with_header("content-type", content_type);
        match file.metadata().await {
            Ok(metadata) => {
                response = response
                    .with_header("content-length", &metadata.len().to_string());
                if let Some(etag) = etag_for(metadata.len(), &metadata) {
                    response = response.with_header("etag", &etag);
                }
            }
            Err(_) => {
                response = response.with_header("transfer-encoding", "chunked");
            }
        }

        Ok(response.with_body(BodySource::reader(file)))
    }
}

fn etag_for(len: u64, metadata: &std::fs::Metadata) -> Option<String> {
    let mtime = metadata.modified().ok()?;
    let secs = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(format!("\"{secs:x}-{len:x}\""))
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
