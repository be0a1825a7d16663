//! Command execution for the RADIUS tracer CLI
//!
//! Wires parsed arguments into run configurations, initializes logging,
//! and dispatches to the backfill or tail orchestrator.

use crate::cli::args::{Args, Commands, CommonArgs};
use crate::processor::backfill::BackfillProcessor;
use crate::processor::tail::TailWatcher;
use crate::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Main command runner
pub async fn run(args: Args, cancel: CancellationToken) -> Result<()> {
    let Some(command) = args.command else {
        return Err(Error::configuration("no command given; see --help"));
    };

    match command {
        Commands::Backfill(backfill_args) => {
            setup_logging(&backfill_args.common)?;
            let config = backfill_args.to_config();
            debug!("Backfill configuration: {:?}", config);
            info!("Starting backfill mode");

            let report = BackfillProcessor::new(config).run(cancel).await?;
            if report.files_failed > 0 {
                return Err(Error::file_processing(
                    format!("{} files", report.files_failed),
                    "left in place for retry; see log for details",
                ));
            }
            Ok(())
        }
        Commands::Watch(watch_args) => {
            setup_logging(&watch_args.common)?;
            let config = watch_args.to_config();
            debug!("Watch configuration: {:?}", config);
            info!("Starting tail mode");

            TailWatcher::new(config).run(cancel).await
        }
    }
}

/// Initialize tracing from the verbosity flags; RUST_LOG wins when set
fn setup_logging(common: &CommonArgs) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("radius_tracer={}", common.log_level())));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| Error::configuration(format!("could not initialize logging: {e}")))?;

    Ok(())
}
