#[tokio::main]
async fn main() -> anyhow::Result<()> {
    streamchat::run().await
}
