use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tasksmith::run().await
}
