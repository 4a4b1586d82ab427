#[tokio::main]
async fn main() -> anyhow::Result<()> {
    avcapture_player_lib::run().await
}
