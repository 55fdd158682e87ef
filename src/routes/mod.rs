pub mod capture;
pub mod config_routes;
pub mod consumption;
pub mod health;
pub mod readings;
pub mod snapshots;
pub mod status;
pub mod stream;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(config_routes::router())
                .merge(readings::router())
                .merge(consumption::router())
                .merge(snapshots::router())
                .merge(capture::router())
                .merge(stream::router())
                .merge(status::router()),
        )
        .with_state(state)
}
