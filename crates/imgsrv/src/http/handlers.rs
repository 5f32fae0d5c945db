//! Handlers for the image resource.

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use imgsrv_core::types::Link;
use imgsrv_core::{DeriveParams, ImageDocument, Provenance, SourceId};
use serde::Deserialize;

use super::error::ApiError;
use super::AppState;

/// Multipart field carrying the uploaded image.
const UPLOAD_FIELD: &str = "Document";

/// Response header naming where the bytes came from.
const CACHE_HEADER: &str = "x-imgsrv-cache";

/// Body of a POST that asks the server to fetch the image itself.
#[derive(Debug, Deserialize)]
pub struct OriginRequest {
    #[serde(rename = "_links")]
    pub links: OriginLinks,
    #[serde(default)]
    pub userdata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct OriginLinks {
    pub origin: Link,
}

#[derive(Debug, Deserialize)]
pub struct UserdataRequest {
    pub userdata: serde_json::Value,
}

/// Ingests a new source.
///
/// `POST {base_route}` with a multipart `Document` field, a raw image body,
/// or a JSON body naming an origin URL.
pub async fn create_source(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ImageDocument>, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let ingested = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let bytes = upload_field(multipart).await?;
        state.imgsrv.ingest_upload(bytes.to_vec()).await?
    } else if content_type.starts_with("application/json") {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let req: OriginRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid origin request: {e}")))?;
        state
            .imgsrv
            .ingest_origin(&req.links.origin.href, req.userdata)
            .await?
    } else {
        let body = Bytes::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        state.imgsrv.ingest_upload(body.to_vec()).await?
    };

    Ok(Json(ingested.document))
}

async fn upload_field(mut multipart: Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()));
        }
    }
    Err(ApiError::BadRequest(format!(
        "multipart body has no '{UPLOAD_FIELD}' field"
    )))
}

/// Replaces a source's userdata.
///
/// `PUT {base_route}{guid}`
pub async fn update_userdata(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Json(req): Json<UserdataRequest>,
) -> Result<Json<ImageDocument>, ApiError> {
    let source = SourceId::parse(&guid)?;
    let document = state.imgsrv.update_userdata(&source, req.userdata).await?;
    Ok(Json(document))
}

/// Serves a source or one of its derivatives.
///
/// `GET {base_route}{guid}?polygon=..&rotation=..&width=..&height=..&grayscale=..`
pub async fn get_image(
    State(state): State<AppState>,
    Path(guid): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let source = SourceId::parse(&guid)?;
    let params = DeriveParams::from_query(query.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let derivation = state.imgsrv.derive(&source, params).await?;

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if prefers_json(accept, &derivation.document.metadata.mimetype) {
        return Ok(Json(derivation.document).into_response());
    }

    let mimetype = HeaderValue::from_str(&derivation.document.metadata.mimetype)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let cache = match derivation.provenance {
        Provenance::Original => "original",
        Provenance::Cached => "hit",
        Provenance::Computed => "miss",
        Provenance::Shared => "shared",
    };
    Ok((
        [
            (header::CONTENT_TYPE, mimetype),
            (
                header::HeaderName::from_static(CACHE_HEADER),
                HeaderValue::from_static(cache),
            ),
        ],
        Bytes::copy_from_slice(&derivation.data),
    )
        .into_response())
}

/// Whether an `Accept` header ranks `application/json` above `mimetype`.
/// Ties go to whichever is listed first.
pub(crate) fn prefers_json(accept: &str, mimetype: &str) -> bool {
    let (image_type, _) = mimetype.split_once('/').unwrap_or((mimetype, ""));
    let mut json: Option<(f32, usize)> = None;
    let mut image: Option<(f32, usize)> = None;

    for (position, range) in accept.split(',').enumerate() {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let q = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);

        let better = |slot: &Option<(f32, usize)>| slot.map_or(true, |(best, _)| q > best);
        if media == "application/json" && better(&json) {
            json = Some((q, position));
        }
        let matches_image = media == mimetype
            || media == format!("{image_type}/*")
            || media == "*/*";
        if matches_image && better(&image) {
            image = Some((q, position));
        }
    }

    match (json, image) {
        (Some((jq, _)), None) => jq > 0.0,
        (Some((jq, jp)), Some((iq, ip))) => jq > iq || (jq == iq && jp < ip),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_json() {
        assert!(prefers_json("application/json", "image/jpeg"));
        assert!(prefers_json("application/json, image/*", "image/jpeg"));
        assert!(prefers_json("image/png;q=0.5, application/json", "image/png"));
        assert!(!prefers_json("", "image/jpeg"));
        assert!(!prefers_json("*/*", "image/jpeg"));
        assert!(!prefers_json("image/jpeg, application/json", "image/jpeg"));
        assert!(!prefers_json("application/json;q=0.2, image/*", "image/webp"));
        assert!(!prefers_json("application/json;q=0", "image/jpeg"));
    }
}
