//! Route definitions of the metadata service.

use axum::{routing::get, Router};

use super::{handlers, state::MetadataState};

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Creates the router of one instance's metadata endpoints, namespaced by its name.
pub fn create_router(state: MetadataState) -> Router {
    let prefix = format!("/{}", state.name());
    let mut router = Router::new()
        .route(&format!("{prefix}/sshKey"), get(handlers::ssh_key_handler))
        .route(&format!("{prefix}/hostname"), get(handlers::hostname_handler));

    if state.cloud_config().is_some() {
        router = router.route(
            &format!("{prefix}/cloud-config"),
            get(handlers::cloud_config_handler),
        );
    }

    router.with_state(state)
}
