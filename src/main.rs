use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use migration::{Migrator, MigratorTrait};

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::playlists::PlaylistBuilder;
use crate::repository::SeaOrmRepository;
use crate::scanner::{refresh_catalog, CancelHandle, Synchronizer};

mod api;
mod config;
mod decoder;
mod error;
mod library;
mod logger;
mod playlists;
mod repository;
mod scanner;
mod walker;

#[cfg(test)]
mod test_util;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let config = Config::from_env();
    let progress = logger::init(config.log_level)?;

    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    let db: DatabaseConnection = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;

    let music_root = PathBuf::from(&config.music_path);
    if !music_root.is_dir() {
        warn!("Music path {} is not a directory", music_root.display());
    }

    let repository = Arc::new(SeaOrmRepository::new(db.clone()));
    let synchronizer = Arc::new(
        Synchronizer::new(repository.clone(), config.scan_config()).with_progress(progress),
    );
    let playlists = Arc::new(PlaylistBuilder::new(repository));

    {
        let synchronizer = synchronizer.clone();
        let playlists = playlists.clone();
        let root = music_root.clone();
        tokio::spawn(async move {
            refresh_catalog(&synchronizer, &playlists, &root).await;
        });
    }

    let state = AppState {
        db,
        music_path: config.music_path.clone(),
        synchronizer: synchronizer.clone(),
        playlists,
    };
    let app = create_router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(synchronizer.cancel_handle()))
        .await?;

    Ok(())
}

async fn shutdown_signal(scan: CancelHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    scan.cancel();
}
