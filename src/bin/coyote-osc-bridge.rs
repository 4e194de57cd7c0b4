use clap::Parser;
use log::{error, info};
use coyote_osc_bridge::{init_logging, run, Cli};
use coyote_osc_bridge::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!(concat!("Coyote OSC bridge ", env!("CARGO_PKG_VERSION")));

    match run(cli) {
        Err(err @ AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("Another instance of the bridge is already using this config file");
            Err(err)
        },
        Err(err) => {
            error!("{}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
