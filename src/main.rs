use actix_web::{middleware::Logger, App, HttpServer};
use dotenv::dotenv;

use relaychat_server::config::init_config;
use relaychat_server::routes::configure_app;
use relaychat_server::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Load application settings
    let app_settings = match init_config() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load application settings: {}", e);
            log::error!("Cannot start server without valid settings");
            std::process::exit(1);
        }
    };

    let host = app_settings.server.host.clone();
    let port = app_settings.server.port;

    let app_state = match AppState::from_settings(app_settings) {
        Ok(state) => state,
        Err(e) => {
            log::error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    if app_state.is_mock() {
        log::info!("MOCK=1: serving the canned reply, upstream calls disabled");
    } else if app_state.provider.is_none() {
        log::warn!("MISTRAL_API_KEY is not set; chat streams will end immediately");
    }
    log::info!(
        "Allowed origins: {}",
        app_state.settings.server.allowed_origins.join(", ")
    );

    log::info!("Starting {} on {}:{}", app_state.settings.app.name, host, port);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .configure(configure_app(app_state.clone()))
    })
    .bind((host.as_str(), port))?
    .run()
    .await
}
