#[macro_use]
extern crate tracing;

use foundations::{cli::Cli, telemetry, BootstrapResult};

use crate::settings::ServerSettings;

#[cfg(feature = "sql")]
mod db;
mod leetcode;
mod metrics;
mod model;
mod rank;
mod roster;
mod server;
mod settings;
mod stats;
mod store;
mod util;

#[tokio::main]
async fn main() -> BootstrapResult<()> {
  tracing_subscriber::fmt::init();

  let service_info = foundations::service_info!();
  let cli = Cli::<ServerSettings>::new(&service_info, vec![])?;

  let tele_driver = telemetry::init_with_server(&service_info, &cli.settings.telemetry, vec![])?;
  if let Some(tele_serv_addr) = tele_driver.server_addr() {
    info!("Telemetry server is listening on http://{}", tele_serv_addr);
  }
  tokio::spawn(tele_driver);

  server::start_server(&cli.settings).await
}
