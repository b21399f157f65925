use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut options = clair_load_testserver::TestServerOptions::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let addr = args.next().ok_or_else(|| {
                    anyhow::anyhow!("--bind requires an address, e.g. 127.0.0.1:0")
                })?;
                bind_addr = addr.parse()?;
            }
            "--delay-ms" => {
                let ms = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--delay-ms requires a number"))?;
                options.delay = Duration::from_millis(ms.parse()?);
            }
            "--fail-hash" => {
                let hash = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--fail-hash requires a manifest hash"))?;
                options.failing_hashes.insert(hash);
            }
            "-h" | "--help" => {
                eprintln!(
                    "clair-load-testserver\n\nUSAGE:\n  clair-load-testserver [--bind 127.0.0.1:0] [--delay-ms N] [--fail-hash HASH]...\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let stats = clair_load_testserver::TestServerStats::default();
    let app = clair_load_testserver::router(stats, options);

    println!("HTTP_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
