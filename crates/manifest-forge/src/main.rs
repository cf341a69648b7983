use std::process::ExitCode;

use manifest_forge::config::{
    ApplicationConfig, EXIT_CREATE_FAILED, EXIT_DIRTY_SHUTDOWN, EXIT_RUN_FAILED, EXIT_SUCCESS,
};
use manifest_forge::{logging, Application};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = color_eyre::install();

    let config = match ApplicationConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(EXIT_CREATE_FAILED);
        }
    };
    if let Err(err) = logging::setup_logging(config.log_style, &config.log_level) {
        eprintln!("failed to set up logging: {err}");
        return ExitCode::from(EXIT_CREATE_FAILED);
    }

    let application = match Application::create(config).await {
        Ok(application) => application,
        Err(err) => {
            error!("failed to create application: {err:?}");
            return ExitCode::from(EXIT_CREATE_FAILED);
        }
    };

    match application.run().await {
        Ok(true) => ExitCode::from(EXIT_SUCCESS),
        Ok(false) => ExitCode::from(EXIT_DIRTY_SHUTDOWN),
        Err(err) => {
            error!("failed to run application: {err:?}");
            ExitCode::from(EXIT_RUN_FAILED)
        }
    }
}
