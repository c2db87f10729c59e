use std::process::ExitCode;

use tracing::{info, warn};

use tinyurl::config::StaticConfig;
use tinyurl::runtime::Runtime;
use tinyurl::system::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    if std::env::args().nth(1).as_deref() == Some("generate-config") {
        println!("{}", StaticConfig::generate_sample_config());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match StaticConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e.format_colored());
            return Ok(ExitCode::FAILURE);
        }
    };

    let _log_guard = init_logging(&config.logging)?;

    let runtime = match Runtime::start(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", e.format_colored());
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        "tinyurl storage running on {} keeper",
        runtime.storage().backend_name()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            "Failed to listen for Ctrl+C: {}. Proceeding with shutdown anyway.",
            e
        );
    }

    if runtime.shutdown().await {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
