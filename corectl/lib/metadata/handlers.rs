//! HTTP request handlers of the metadata service.
//!
//! Every handler first admits the caller by address. Responses are plain text.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::state::MetadataState;

//-------------------------------------------------------------------------------------------------
// Functions: Handlers
//-------------------------------------------------------------------------------------------------

/// Handler for `GET /<name>/sshKey`
///
/// Returns the public key corectl logs into the guest with.
pub async fn ssh_key_handler(
    State(state): State<MetadataState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if state.admit(peer).is_none() {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    state.ssh_key_sent();
    (StatusCode::OK, state.ssh_key().to_string()).into_response()
}

/// Handler for `GET /<name>/hostname`
pub async fn hostname_handler(
    State(state): State<MetadataState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if state.admit(peer).is_none() {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    (StatusCode::OK, state.name().to_string()).into_response()
}

/// Handler for `GET /<name>/cloud-config`
///
/// Only routed when the instance was given a local cloud-config.
pub async fn cloud_config_handler(
    State(state): State<MetadataState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if state.admit(peer).is_none() {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }

    match state.cloud_config() {
        Some(contents) => {
            let contents = contents.to_string();
            state.cloud_config_sent();
            (StatusCode::OK, contents).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
