mod auth;
mod config;
mod error;
mod middleware;
mod models;
mod routes;
mod source;
mod util;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;
pub use source::{SourceClient, SourcePortal};

use crate::middleware::RequestLogger;
use crate::routes as app_routes;
use rocket::{Build, Rocket, catchers};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level for fine-grained control,
    // e.g. RUST_LOG=info,club_source::source=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    if json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

pub fn build_rocket(config: Config, portal: Arc<dyn SourcePortal>) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("port", config.server.port))
        .merge(("address", config.server.address.clone()));

    rocket::custom(figment)
        .attach(RequestLogger)
        .attach(source::stage_portal(portal))
        .manage(config.auth.clone())
        .mount("/", app_routes::health::routes())
        .mount("/access", app_routes::access::routes())
        .mount("/user", app_routes::user::routes())
        .register("/", catchers![app_routes::error::unauthorized, app_routes::error::not_found])
}
