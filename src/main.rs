#[tokio::main]
async fn main() {
    pgbundle::cli::main().await;
}
