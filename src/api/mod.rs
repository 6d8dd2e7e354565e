// API module
//
// HTTP surface over the ledger: chain inspection, balances, transfers and wallets

pub mod handlers;
pub mod routes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::blockchain::Blockchain;
use crate::config::Config;

pub use handlers::ApiState;
pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::get_balance,
        handlers::send,
        handlers::create_wallet,
        handlers::list_addresses
    ),
    components(
        schemas(
            handlers::InputView,
            handlers::OutputView,
            handlers::TransactionView,
            handlers::BlockView,
            handlers::ChainResponse,
            handlers::BalanceResponse,
            handlers::SendRequest,
            handlers::SendResponse,
            handlers::WalletResponse
        )
    ),
    tags(
        (name = "ledger", description = "UTXO ledger API endpoints")
    ),
    info(
        title = "UTXO Ledger API",
        version = "1.0.0",
        description = "A single-node proof-of-work UTXO ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

/// Serves the HTTP API over an existing chain until the server shuts down
pub fn serve(config: Config, bind: String, cancel: Arc<AtomicBool>) -> anyhow::Result<()> {
    let chain = Blockchain::open(&config.data_dir)?;

    let state = web::Data::new(ApiState {
        chain,
        wallet_file: config.wallet_file,
        wallet_lock: Mutex::new(()),
        cancel: cancel.clone(),
    });

    info!("Starting HTTP server at http://{}", bind);

    let app_state = state.clone();
    let served = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            let openapi = ApiDoc::openapi();

            App::new()
                .wrap(middleware::Logger::default())
                .wrap(cors)
                .app_data(app_state.clone())
                .configure(configure_routes)
                .service(SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi))
        })
        .bind(bind.as_str())
        .with_context(|| format!("failed to bind {}", bind))?
        .run()
        .await
        .context("HTTP server failed")
    });

    // stop any transfer still mining
    cancel.store(true, Ordering::SeqCst);

    match Arc::try_unwrap(state.into_inner()) {
        Ok(state) => state.chain.close()?,
        Err(_) => warn!("Chain store still in use at shutdown, leaving it to flush on drop"),
    }

    served
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();

        for path in [
            "/api/v1/chain",
            "/api/v1/balance/{address}",
            "/api/v1/send",
            "/api/v1/wallets",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == path), "missing {}", path);
        }
    }

    #[test]
    fn test_serve_requires_existing_chain() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path().join("blocks"), dir.path().join("wallets.data"));

        let result = serve(config, "127.0.0.1:0".to_string(), Arc::new(AtomicBool::new(false)));
        assert!(result.is_err());
    }
}
