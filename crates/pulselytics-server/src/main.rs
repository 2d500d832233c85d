use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pulselytics_server::state::AppState;

/// `pulselytics health` — liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$PULSELYTICS_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("PULSELYTICS_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Health-check subcommand runs before tokio does any work so the probe
    // stays fast inside a container.
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pulselytics=info".parse()?),
        )
        .json()
        .init();

    let cfg = pulselytics_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Ensure data directory exists before opening DuckDB.
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/pulselytics.db", cfg.data_dir);

    let db = pulselytics_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    // GeoIP is optional: without the database, events are stored with NULL
    // country/region/city fields.
    if !std::path::Path::new(&cfg.geoip_path).exists() {
        tracing::warn!(
            geoip_path = %cfg.geoip_path,
            "GeoIP database not found; events stored with NULL geo fields. \
             Set PULSELYTICS_GEOIP_PATH to a MaxMind City .mmdb file to enable lookups."
        );
    }

    // Optionally seed a site with a fixed id so a fresh install can accept
    // beacons without a registration call.
    if let Some(site_id) = &cfg.seed_site_id {
        match db.seed_site(site_id, "Default site", "localhost").await {
            Ok(()) => info!(site_id, "Seed site ready"),
            Err(e) => tracing::warn!(site_id, error = %e, "Failed to seed site"),
        }
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));

    // Spawn background buffer-flush task.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_buffer_flush_loop().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = pulselytics_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, "Pulselytics listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let state_for_shutdown = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    // One last flush so buffered events survive a clean shutdown.
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state_for_shutdown.flush_buffer(),
    )
    .await
    .ok();

    Ok(())
}
