#[tokio::main]
async fn main() -> anyhow::Result<()> {
    retroflow_lib::run().await
}
