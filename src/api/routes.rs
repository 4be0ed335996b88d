use actix_web::{error::InternalError, web, HttpResponse};

use super::handlers::{self, StatusResponse};

/// Configures the API routes
///
/// Paths are unprefixed because sibling nodes fetch `/chain` and relay to `/transactions`
/// directly.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    // Undecodable bodies are reported to the caller and never reach the ledger
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(StatusResponse::new(format!("Error decode: {}", err)));
        InternalError::from_response(err, response).into()
    });

    cfg.app_data(json_config)
        .route("/chain", web::get().to(handlers::get_chain))
        .route("/transactions", web::get().to(handlers::get_transactions))
        .route("/transactions", web::post().to(handlers::new_transaction))
        .route("/transactions", web::put().to(handlers::relayed_transaction))
        .route("/mine", web::get().to(handlers::mine))
        .route("/mine/start", web::get().to(handlers::start_mining))
        .route("/amount", web::get().to(handlers::get_amount))
        .route("/consensus", web::put().to(handlers::consensus))
        .route("/wallet", web::post().to(handlers::create_wallet))
        .route("/validate", web::get().to(handlers::validate_chain));
}
