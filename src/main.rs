use teleinfo_ingest::{
    config::Config, control::ControlSocket, logging, serial::SerialPort, Daemon, Station,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = Config::path_from_env();
    let config = Config::load(&config_path)?;

    let log = logging::init(&config.logging)?;
    info!("Starting teleinfod {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", config_path.display());

    let schema = config.schema()?;
    let sinks = config.sinks()?;

    let mut serial = SerialPort::open(&config.serial).await?;
    let mut control = ControlSocket::bind(&config.control).await?;

    let timeout = config.serial.timeout();
    let mut daemon = Daemon::new(Station::new(schema, sinks), log, timeout);
    daemon.run(&mut serial, &mut control).await?;

    info!("teleinfod stopped");
    Ok(())
}
