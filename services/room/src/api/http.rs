use axum::{
    extract::State as AxumState,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stakeroom_protocol::{AmountInput, UserId};
use tracing::{error, info, warn};

use super::AppState;
use crate::ledger::LedgerError;

const USER_COOKIE: &str = "userId";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    user_id: UserId,
    uuid: String,
    balance: u64,
    first_time: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChargeRequest {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    amount: Option<AmountInput>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Serialize)]
struct ChargeResponse {
    success: bool,
    balance: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

fn reject(status: StatusCode, error: &'static str) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// GET /init - returns the caller's account, issuing one on first contact.
pub(super) async fn init(AxumState(state): AxumState<AppState>, headers: HeaderMap) -> Response {
    if let Some(user) = cookie_value(&headers, USER_COOKIE).map(UserId::from) {
        if let Some(account) = state.ledger.get(&user) {
            return Json(InitResponse {
                user_id: user,
                uuid: account.secret,
                balance: account.balance,
                first_time: false,
            })
            .into_response();
        }
    }

    let (user, account) = state.ledger.create(state.config.initial_balance);
    state.ledger.persist();
    info!(user = %user, balance = account.balance, "issued new user");

    let cookie = format!("{USER_COOKIE}={user}; Path=/; HttpOnly");
    (
        [(header::SET_COOKIE, cookie)],
        Json(InitResponse {
            user_id: user,
            uuid: account.secret,
            balance: account.balance,
            first_time: true,
        }),
    )
        .into_response()
}

/// POST /charge - admin balance adjustment by a signed delta.
pub(super) async fn charge(
    AxumState(state): AxumState<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChargeRequest>,
) -> Response {
    let presented = request.token.as_deref().or_else(|| bearer_token(&headers));
    let authorized = match (state.admin_token.as_deref(), presented) {
        (Some(expected), Some(presented)) => expected == presented,
        _ => false,
    };
    if !authorized {
        warn!("rejected charge with invalid token");
        return reject(StatusCode::UNAUTHORIZED, "Invalid token");
    }

    let Some(user) = request.user_id.filter(|user| state.ledger.contains(user)) else {
        return reject(StatusCode::BAD_REQUEST, "User not found");
    };
    let Some(delta) = request.amount.as_ref().and_then(AmountInput::whole) else {
        return reject(StatusCode::BAD_REQUEST, "Invalid amount");
    };

    match state.ledger.adjust(&user, delta) {
        Ok(balance) => {
            state.ledger.persist();
            info!(user = %user, delta, balance, "charge applied");
            Json(ChargeResponse {
                success: true,
                balance,
            })
            .into_response()
        }
        Err(LedgerError::UnknownUser(_)) => reject(StatusCode::BAD_REQUEST, "User not found"),
        Err(LedgerError::InsufficientBalance { .. }) => {
            reject(StatusCode::BAD_REQUEST, "Insufficient balance")
        }
        Err(err) => {
            error!(user = %user, ?err, "charge failed");
            reject(StatusCode::BAD_REQUEST, "Invalid amount")
        }
    }
}

pub(super) async fn healthz() -> &'static str {
    "ok"
}
