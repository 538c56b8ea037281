use axum::Extension;
use axum::Json;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::error;

use crate::logger::Logger;
use crate::server::dtos::health_dto::{AllowlistHealth, HealthResponse, HealthStatus};
use crate::server::services::proxy_services::ProxyServices;
use crate::server::{get_app_version, get_uptime_seconds};

/// health endpoint, only depends on the channel catalog being loadable
pub async fn health_endpoint(
    Extension(services): Extension<ProxyServices>,
) -> (StatusCode, Json<HealthResponse>) {
    let allowlist = check_allowlist_health(&services).await;

    let status = if allowlist.is_some() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let response = HealthResponse {
        status,
        timestamp: Utc::now(),
        uptime_seconds: get_uptime_seconds(),
        version: get_app_version().to_string(),
        environment: Logger::environment_name(services.config.cargo_env).to_string(),
        allowlist,
    };

    let http_status = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}

async fn check_allowlist_health(services: &ProxyServices) -> Option<AllowlistHealth> {
    match services.allowlist.snapshot().await {
        Ok(snapshot) => Some(AllowlistHealth {
            hosts: snapshot.host_count(),
            admitted_hosts: services.allowlist.admitted_count(),
            channels: snapshot.channels().len(),
        }),
        Err(e) => {
            error!("Channel catalog health check failed: {}", e);
            None
        }
    }
}
