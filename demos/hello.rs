use std::time::Duration;

use async_trait::async_trait;
use gale::middleware::logging;
use gale::{
    handler_fn, CorsOptions, Handler, Request, Response, Router, Server, ServerOpts, StatusCode,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, req: &mut Request) -> Response {
        match req.body().await {
            Ok(body) => Response::new()
                .with_header("content-type", "application/octet-stream")
                .with_header("content-length", &body.len().to_string())
                .with_body(body),
            Err(e) => {
                Response::text(format!("bad body: {e}\n")).with_status(StatusCode::BAD_REQUEST)
            }
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut router = Router::new().with_cors(CorsOptions::default());

    router.get(
        "/",
        handler_fn(|_req| Box::pin(async { Response::html("<h1>gale</h1>") })),
    );

    router.get(
        "/hello/:name",
        handler_fn(|req| {
            let name = req.param("name").unwrap_or("world").to_string();
            Box::pin(async move { Response::text(format!("hello, {name}\n")) })
        }),
    );

    router.get(
        "/stream",
        handler_fn(|_req| {
            Box::pin(async {
                Response::stream(&["X-Lines"], |mut w, t| async move {
                    for i in 0..5 {
                        w.write(format!("line {i}\n")).await?;
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    t.set("X-Lines", "5");
                    Ok(())
                })
            })
        }),
    );

    router.post("/echo", Echo);

    router.use_middleware(logging());

    let opts = ServerOpts {
        addr: "127.0.0.1:42069".to_string(),
        keep_alive_timeout: Some(Duration::from_secs(15)),
        ..Default::default()
    };

    let server = Server::serve(opts, router.into_handler()).await?;
    println!("listening on http://{}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    server.close();
    Ok(())
}
