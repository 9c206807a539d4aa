use club_source::{Config, SourceClient, SourcePortal, build_rocket, init_tracing};
use std::sync::Arc;

#[rocket::main]
async fn main() -> Result<(), rocket::Error> {
    dotenvy::dotenv().ok();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging.level, config.logging.json_format);

    let portal: Arc<dyn SourcePortal> = match SourceClient::new(&config.source) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            eprintln!("Failed to build the portal client: {err}");
            std::process::exit(1);
        }
    };

    let _ = build_rocket(config, portal).launch().await?;
    Ok(())
}
