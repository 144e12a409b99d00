mod command;
mod config;
mod logging;
mod paths;
mod server;
mod store;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    server::run().await
}
