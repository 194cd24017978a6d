pub mod app;
pub mod handlers;

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum MigrateDirection {
    Up,
    Down,
    Fresh,
}

use crate::config::ServerConfig;
use crate::database::{connection::*, migrations::Migrator};
use crate::services::notifier_from_config;
use anyhow::Result;
use sea_orm_migration::prelude::*;
use tracing::info;

pub async fn start_server(config: ServerConfig) -> Result<()> {
    config.validate()?;

    let db = setup_database(&config.database).await?;
    info!("Database migrations completed");

    let notifier = notifier_from_config(&config.notifier)?;
    let state = app::AppState::new(db, notifier, config.page_size);
    let app = app::create_app(state, config.cors_origin.as_deref())?;

    log_routes();

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server running on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn log_routes() {
    info!("API Endpoints:");
    info!("  /health                          - Health check");
    info!("  /api/v1/pull                     - Phased pull (GET ?workspaceId=&cursor=)");
    info!("  /api/v1/mutate/create            - Create comment");
    info!("  /api/v1/mutate/update            - Update issue, comment or description");
    info!("  /api/v1/mutate/delete            - Delete issue or comment");
    info!("  /api/v1/mutate/createNewIssue    - Create issue with its description");
}

pub async fn migrate_database(database_path: &str, direction: MigrateDirection) -> Result<()> {
    let database_url = get_database_url(Some(database_path));
    let db = establish_connection(&database_url).await?;

    match direction {
        MigrateDirection::Up => {
            info!("Running migrations up");
            Migrator::up(&db, None).await?;
        }
        MigrateDirection::Down => {
            info!("Running migrations down");
            Migrator::down(&db, None).await?;
        }
        MigrateDirection::Fresh => {
            info!("Running fresh migrations (down then up)");
            Migrator::down(&db, None).await?;
            Migrator::up(&db, None).await?;
        }
    }

    info!("Database migration completed");
    Ok(())
}
