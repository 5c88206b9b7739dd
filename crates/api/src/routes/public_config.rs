//! Public configuration endpoint handler.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::app::AppState;
use crate::config::Config;

/// Active broker and topic configuration. Credentials are never included.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfigResponse {
    pub broker: String,
    pub topics: TopicsResponse,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicsResponse {
    pub badges: String,
    pub geofence: String,
    pub publish_prefix: String,
}

impl From<&Config> for PublicConfigResponse {
    fn from(config: &Config) -> Self {
        let broker = config
            .broker
            .address()
            .map(|address| address.to_string())
            .unwrap_or_else(|_| config.broker.url.clone());

        Self {
            broker,
            topics: TopicsResponse {
                badges: config.topics.badges.clone(),
                geofence: config.topics.geofence.clone(),
                publish_prefix: config.topics.publish_prefix.clone(),
            },
        }
    }
}

/// Active broker address and topic patterns.
///
/// GET /api/config
pub async fn get_config(State(state): State<AppState>) -> Json<PublicConfigResponse> {
    Json(PublicConfigResponse::from(state.config.as_ref()))
}
