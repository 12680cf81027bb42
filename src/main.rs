use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};

mod config;
mod error;
mod handlers;
mod qr;

use config::Config;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    println!("🦀 Starting QR Code Generator API...");

    let mut config = Config::load().expect("Failed to load config");
    config.ensure_data_dir();
    startup_diagnostics(&config);

    let host = config.server.host.clone();
    let port = config.server.port;

    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📁 Data directory: {}", config.data_dir.display());

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::JsonConfig::default().error_handler(error::json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(error::query_error_handler))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(format!("{}:{}", host, port))?
    .run()
    .await
}

// Диагностика при старте: платформа, рабочая директория, права записи.
// Любая неудача здесь не мешает обработке запросов.
fn startup_diagnostics(config: &Config) {
    log::info!("Platform: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    if let Ok(cwd) = std::env::current_dir() {
        log::info!("Working directory: {}", cwd.display());
    }
    log::info!("Data directory: {}", config.data_dir.display());
    match config.write_test().as_str() {
        "writable" => {
            log::info!("Successfully verified write permissions to data directory")
        }
        reason => {
            log::error!("Failed to write to data directory: {}", reason);
            log::info!("Application will continue but some features may be limited");
        }
    }
}
