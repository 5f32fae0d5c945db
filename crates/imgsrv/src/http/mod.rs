//! The HTTP surface.
//!
//! [`build_router`] mounts the image resource under `server.base_route`:
//!
//! ```text
//! POST {base_route}         ingest (multipart, raw body or origin JSON)
//! GET  {base_route}{guid}   source or derivative, pixels or JSON document
//! PUT  {base_route}{guid}   replace userdata
//! ```

mod error;
mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use imgsrv_core::ImgSrv;
use tower_http::trace::TraceLayer;

/// Shared application state. `ImgSrv` is already cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub imgsrv: ImgSrv,
}

/// Builds the router with all routes, the upload size limit and request tracing.
pub fn build_router(state: AppState) -> Router {
    let base = state.imgsrv.config().server.base_route.clone();
    let max_body = usize::try_from(state.imgsrv.config().limits.max_file_size_mb)
        .unwrap_or(usize::MAX / (1024 * 1024))
        .saturating_mul(1024 * 1024);

    Router::new()
        .route(&base, post(handlers::create_source))
        .route(
            &format!("{base}{{guid}}"),
            get(handlers::get_image).put(handlers::update_userdata),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use imgsrv_core::Config;
    use serde_json::{json, Value};
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "imgsrv-test-boundary";

    async fn test_app(dir: &std::path::Path) -> Router {
        let mut config = Config::default();
        config.storage.upload_dir = dir.join("uploads");
        config.storage.cache_dir = dir.join("cache");
        config.server.base_url = "http://img.test/".into();
        let imgsrv = ImgSrv::new(config).await.unwrap();
        build_router(AppState { imgsrv })
    }

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn multipart_body(field: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"elefants.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn upload(app: &Router, width: u32, height: u32) -> Value {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body("Document", &jpeg(width, height))))
            .unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&body).unwrap()
    }

    fn guid(document: &Value) -> String {
        let href = document["_links"]["self"]["href"].as_str().unwrap();
        href.trim_start_matches("http://img.test/").to_string()
    }

    fn get(uri: &str, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let doc = upload(&app, 1200, 800).await;
        assert_eq!(doc["metadata"]["width"], 1200);
        assert_eq!(doc["metadata"]["height"], 800);
        assert_eq!(doc["metadata"]["format"], "jpeg");
        assert!(doc["created"]["datetime"].is_string());
    }

    #[tokio::test]
    async fn test_upload_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(jpeg(40, 30)))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["metadata"]["width"], 40);
    }

    #[tokio::test]
    async fn test_upload_without_document_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body("Other", &jpeg(4, 4))))
            .unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_source_and_info() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let guid = guid(&upload(&app, 120, 80).await);

        let (status, headers, body) = send(&app, get(&format!("/{guid}"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers["x-imgsrv-cache"], "original");
        assert_eq!(&body[..2], &[0xFF, 0xD8]);

        let (status, _, body) =
            send(&app, get(&format!("/{guid}"), Some("application/json"))).await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["metadata"]["width"], 120);
    }

    #[tokio::test]
    async fn test_get_derivative_then_cached() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let guid = guid(&upload(&app, 1200, 800).await);
        let uri = format!(
            "/{guid}?polygon=[{{x:421,y:264}},{{x:755,y:264}},{{x:755,y:453}},{{x:421,y:453}}]"
        )
        .replace('{', "%7B")
        .replace('}', "%7D")
        .replace('[', "%5B")
        .replace(']', "%5D");

        let (status, headers, _) = send(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-imgsrv-cache"], "miss");

        let (status, headers, _) = send(&app, get(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["x-imgsrv-cache"], "hit");

        let (status, _, body) = send(&app, get(&uri, Some("application/json"))).await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["metadata"]["width"], 334);
        assert_eq!(doc["metadata"]["height"], 189);
        assert_eq!(
            doc["_links"]["source"]["href"],
            format!("http://img.test/{guid}")
        );
    }

    #[tokio::test]
    async fn test_put_userdata() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let guid = guid(&upload(&app, 20, 20).await);

        let userdata = json!({"license": {"label": "CC BY 4.0", "attribution": "someone"}});
        let request = Request::builder()
            .method("PUT")
            .uri(format!("/{guid}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "userdata": userdata })).unwrap(),
            ))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["userdata"]["license"]["label"], "CC BY 4.0");

        let (_, _, body) = send(&app, get(&format!("/{guid}"), Some("application/json"))).await;
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["userdata"], userdata);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let guid = guid(&upload(&app, 20, 20).await);

        let (status, _, body) = send(&app, get("/doesnotexist", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"]["code"], "NOT_FOUND");

        let (status, _, _) = send(&app, get(&format!("/{guid}?width=0"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, get(&format!("/{guid}?rotation=abc"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, get("/bad.id", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_origin_with_bad_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({"_links": {"origin": {"href": "file:///etc/hosts"}}}))
                    .unwrap(),
            ))
            .unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
