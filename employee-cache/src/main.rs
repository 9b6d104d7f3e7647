use employee_cache::application::{
    bootstrap, default_migration_sources, default_placeholder_providers, install_tracing_logger,
    ApplicationContext, ApplicationError,
};
use employee_cache::config::{migration_config_from_environment, ApplicationConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

async fn start() -> Result<ApplicationContext, ApplicationError> {
    let config = ApplicationConfig::init_from_environment()
        .map_err(|error| ApplicationError::Config(Arc::new(error)))?;

    if config.install_tracing_logger {
        install_tracing_logger();
    }

    let migration_config =
        migration_config_from_environment().map_err(ApplicationError::Config)?;

    bootstrap(
        &config,
        migration_config.clone(),
        default_migration_sources(&migration_config),
        default_placeholder_providers(&migration_config),
    )
    .await
}

#[tokio::main]
async fn main() -> ExitCode {
    match start().await {
        Ok(context) => {
            println!("{}", context.cache_service().employee());
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("Startup failed: {}", error);
            eprintln!("Startup failed: {error}");
            ExitCode::FAILURE
        }
    }
}
