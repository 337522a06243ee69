use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use tracing::{debug, info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use startorigin::config::Config;
use startorigin::engagement::Points;
use startorigin::openapi::ApiDoc;
use startorigin::rate_limit::{InMemoryRateLimiter, RateLimiterFacade};
use startorigin::repo::Repo;
use startorigin::routes::{config, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = Config::from_env().context("invalid configuration")?;
    info!("Bootstrapping StartOrigin server");
    info!(
        frontend = cfg.frontend_url.as_deref().unwrap_or("http://localhost:5173"),
        delete_policy = ?cfg.session.delete_policy,
        "configuration loaded"
    );

    let repo = build_repo(&cfg).await?;

    if let Some(every) = cfg.reconcile_interval {
        let points = Points::new(repo.clone());
        info!(interval_secs = every.as_secs(), "ledger reconciliation enabled");
        actix_web::rt::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                match points.reconcile_all().await {
                    Ok(0) => debug!("ledger reconciliation: no drift"),
                    Ok(n) => info!(corrected = n, "ledger reconciliation corrected balances"),
                    Err(e) => warn!(error = %e, "ledger reconciliation failed"),
                }
            }
        });
    }

    let limiter = RateLimiterFacade::new(InMemoryRateLimiter::new(cfg.rate_limit_enabled), cfg.rate_limit.clone());
    let state = AppState::new(repo).with_rate_limiter(limiter);
    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);
    server.run().await?;
    Ok(())
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &Config) -> anyhow::Result<Arc<dyn Repo>> {
    use startorigin::repo::inmem::InMemRepo;

    let repo = match &cfg.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Using in-memory repository backend with snapshot");
            InMemRepo::with_snapshot(dir.join("state.json"))
        }
        None => {
            info!("Using in-memory repository backend");
            InMemRepo::new()
        }
    };
    Ok(Arc::new(repo))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(cfg: &Config) -> anyhow::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    use startorigin::live::ChangeFeed;
    use startorigin::repo::pg::PgRepo;

    let db_url = cfg.database_url.as_deref().context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(db_url)
        .context("Failed to create Pg pool")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("migrations failed")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(PgRepo::new(pool, ChangeFeed::new())))
}
