use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    devpipe::cli::run().await
}
