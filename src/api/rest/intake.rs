use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::engine::intake::{parse_order_message, ParsedOrderMessage};
use crate::error::AppError;
use crate::providers::PostalAddress;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/intake/parse", post(parse_message))
        .route("/postal/:code", get(lookup_postal_code))
}

#[derive(Deserialize)]
pub struct ParseRequest {
    pub message: String,
}

#[derive(Serialize)]
pub struct ParseResponse {
    pub parsed: ParsedOrderMessage,
    pub warnings: Vec<String>,
}

async fn parse_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ParseRequest>,
) -> Result<Json<ParseResponse>, AppError> {
    if payload.message.trim().is_empty() {
        return Err(AppError::BadRequest("message cannot be empty".to_string()));
    }

    let mut parsed = parse_order_message(&payload.message);
    let mut warnings = Vec::new();

    if parsed.customer_name.is_none() {
        warnings.push("customer name not found in message".to_string());
    }

    if parsed.address.is_none() {
        match parsed.postal_code.clone() {
            Some(postal_code) => match state.postal.lookup(&postal_code).await {
                Ok(found) => parsed.address = Some(format_address(&found)),
                Err(err) => {
                    tracing::warn!(postal_code = %postal_code, error = %err, "postal lookup failed");
                    warnings.push(format!("could not complete address from postal code: {err}"));
                }
            },
            None => warnings.push("address not found in message".to_string()),
        }
    }

    Ok(Json(ParseResponse { parsed, warnings }))
}

async fn lookup_postal_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<PostalAddress>, AppError> {
    Ok(Json(state.postal.lookup(&code).await?))
}

fn format_address(found: &PostalAddress) -> String {
    [
        found.street.as_str(),
        found.district.as_str(),
        found.city.as_str(),
        found.state.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(", ")
}
