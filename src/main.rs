use vehicle_registry::{config::load_config, logging, server::Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    logging::init(config.log.format);

    let server = Server::new(&config).await?;
    server.start().await?;

    Ok(())
}
