use anyhow::{Context, Result};
use std::io::Write;

use camerapi::config::{self, ServerConfig, SharedSecret};
use camerapi::{CameraService, WebServer};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let matches = config::build_cli().get_matches();
    if matches.get_flag("print-config") {
        print!("{}", ServerConfig::generate_sample());
        return Ok(());
    }

    let overrides = config::overrides_from_matches(&matches)?;
    let config = ServerConfig::resolve(&overrides).await?;
    let secret = SharedSecret::load(&config.password_file)?;

    log::info!("Recordings go to {}", config.recordings_path.display());
    let service = CameraService::from_config(&config).context("failed to set up the camera")?;

    let mut server = WebServer::new(service, secret, &config);
    server.start(config.bind).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    log::info!("Shutdown requested");

    server.shutdown().await?;
    log::info!("Bye");
    Ok(())
}

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,camerapi=debug"),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{}] [CameraPi] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    })
    .init();
}
