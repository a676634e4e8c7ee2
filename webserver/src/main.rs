use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Result;
use catalog_webserver::{
    create_router, AppState, CatalogConfig, PulumiStackCatalog, StepFunctionsEngine,
};
use log::info;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    sc_utils::setup_logging()?;

    let config = CatalogConfig::from_env()?;
    info!("Starting catalog web server with {:?}", config);

    let state = AppState {
        engine: Arc::new(StepFunctionsEngine::from_env(&config.state_machine_arn).await),
        catalog: Arc::new(PulumiStackCatalog::new(&config)?),
        default_branch: config.default_branch.clone(),
    };
    let app = create_router(state);

    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on {}", address);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
