use axum::Extension;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, header};
use axum_extra::extract::Query;
use tracing::{debug, error};
use validator::Validate;

use crate::server::dtos::stream_dto::StreamQuery;
use crate::server::error::Error;
use crate::server::services::proxy_services::ProxyServices;

/// the validated query plus whatever from the incoming request has to reach upstream
pub struct StreamRequest {
    pub query: StreamQuery,
    pub method: Method,
    pub range: Option<HeaderValue>,
    // only applies to rewritten manifests, binary bodies keep upstream's encoding
    pub accept_encoding: Option<String>,
    pub services: ProxyServices,
}

impl<S> FromRequestParts<S> for StreamRequest
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(services): Extension<ProxyServices> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|err| Error::InternalServerErrorWithContext(err.to_string()))?;

        // axum_extra's query, the stock one can't do repeated `backups=`
        let Query(query): Query<StreamQuery> = Query::from_request_parts(parts, state)
            .await
            .map_err(|err| {
                debug!("Rejected stream query: {}", err);
                Error::InvalidUrl("url parameter is missing or malformed".to_string())
            })?;

        query.validate().map_err(|err| {
            error!("Stream query failed validation: {}", err);
            Error::InvalidUrl(err.to_string())
        })?;

        let range = parts.headers.get(header::RANGE).cloned();
        let accept_encoding = parts
            .headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        Ok(StreamRequest {
            query,
            method: parts.method.clone(),
            range,
            accept_encoding,
            services,
        })
    }
}
