use log::{info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};

use pseudodpms::{AppConfig, AppState, DisplayPowerController, EventCallbackHandler, FileSettings};

#[cfg(feature = "mock-gpio")]
use pseudodpms::MockSysfsBackend;
#[cfg(not(feature = "mock-gpio"))]
use pseudodpms::SysfsBackend;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PSEUDODPMS_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string());
    let config = Arc::new(
        AppConfig::load_from_file(&config_path)
            .unwrap_or_else(|e| panic!("Failed to load config: {e}")),
    );

    let backend = {
        #[cfg(not(feature = "mock-gpio"))]
        {
            Arc::new(SysfsBackend::new(config.gpio.sysfs_root.clone()))
        }
        #[cfg(feature = "mock-gpio")]
        {
            warn!("Running against mock GPIO, no hardware will be touched");
            Arc::new(MockSysfsBackend::new(config.gpio.sysfs_root.clone()))
        }
    };

    let events = Arc::new(EventCallbackHandler::new(
        config.broadcast_capacity,
        config.event_history_capacity,
    ));
    let settings = Arc::new(FileSettings::new(config.settings_path.clone()));
    let controller = DisplayPowerController::new(backend, settings, events)
        .unwrap_or_else(|e| panic!("Failed to load settings: {e}"));
    let app_state = AppState {
        controller: controller.clone(),
    };

    let http_cfg = config.http.clone();
    let server = HttpServer::new(move || {
        let scope_path = http_cfg.path.clone();
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .service(app_state.api_scope(&scope_path))
    });

    let bind_addrs: String;
    let http_cfg = config.http.clone();
    let server = match (&http_cfg.unix_socket, &http_cfg.host) {
        (Some(socket_path), Some(host)) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = format!("{} and {}", socket_path, host);

            server.bind_uds(socket_path)?.bind(host)?
        }
        (Some(socket_path), None) => {
            if Path::new(socket_path).exists() {
                fs::remove_file(socket_path)?;
            }
            bind_addrs = socket_path.clone();

            server.bind_uds(socket_path)?
        }
        (None, Some(host)) => {
            bind_addrs = host.clone();

            server.bind(host)?
        }
        _ => {
            panic!("Config error: either 'unix_socket' or 'host' must be specified")
        }
    };

    info!("Listening for screensaver events on {}...", bind_addrs);

    let result = server.run().await;

    info!("Shutting down, releasing GPIO lines");
    controller.shutdown();
    if let Err(e) = &result {
        warn!("Server exited with error: {e}");
    }
    result
}
