pub mod auth;
pub mod error;
pub mod inbox;
pub mod middleware;
pub mod suggest;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;

/// Assemble the full application router over the shared state. Owner-only
/// routes sit behind the auth middleware; everything else is public.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/sign-up", post(auth::sign_up))
        .route("/verify/{username}", post(auth::verify))
        .route("/unique-username", get(auth::check_username))
        .route("/sign-in", post(auth::sign_in))
        .route("/send-messages", post(inbox::send_message))
        .route("/suggest-messages", post(suggest::suggest_messages));

    let protected = Router::new()
        .route(
            "/accept-messages",
            get(inbox::get_accept_messages).post(inbox::set_accept_messages),
        )
        .route("/get-messages", get(inbox::get_messages))
        .route("/delete-message/{id}", delete(inbox::delete_message))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new().merge(public).merge(protected).with_state(state)
}
