#[tokio::main]
async fn main() -> anyhow::Result<()> {
    studio_ops_dashboard_lib::run().await
}
