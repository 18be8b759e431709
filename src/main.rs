use clap::Parser;
use log::{debug, error};
use tokio_util::sync::CancellationToken;
use bazaar_lib::cli::{self, Cli};
use bazaar_lib::client::BazaarClient;
use bazaar_lib::config::Config;
use bazaar_lib::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let config = Config::try_from(args.config)?;
    logging::init(config.log_level)?;
    debug!("{:?}", &config);

    let client = BazaarClient::open(&config).await?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    if let Err(e) = cli::run(&client, args.command, &cancel).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
