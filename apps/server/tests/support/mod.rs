#![allow(dead_code)]

use anyhow::Context as _;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode},
    Router,
};
use tally::{api::create_router, AppState, Config, WiringStyle};
use tower::ServiceExt as _;

pub const ALL_STYLES: [WiringStyle; 3] = [
    WiringStyle::Constructor,
    WiringStyle::Locator,
    WiringStyle::Manual,
];

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> anyhow::Result<Self> {
        Self::new_with_config(|_| {})
    }

    pub fn with_style(style: WiringStyle) -> anyhow::Result<Self> {
        Self::new_with_config(|config| config.wiring.style = style)
    }

    pub fn new_with_config(configure: impl FnOnce(&mut Config)) -> anyhow::Result<Self> {
        let mut config = Config::default();
        configure(&mut config);

        let state = AppState::new(config).context("initialize AppState")?;
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: AppState) -> Self {
        let router = create_router(state.clone());
        Self { router, state }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        self.request_with_extra_headers(method, path, &[]).await
    }

    pub async fn request_with_extra_headers(
        &self,
        method: Method,
        path: &str,
        extra_headers: &[(&str, &str)],
    ) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
        dispatch(self.router.clone(), method, path, extra_headers).await
    }

    pub async fn get_text(&self, path: &str) -> anyhow::Result<(StatusCode, String)> {
        let (status, _headers, body) = self.request(Method::GET, path).await?;
        Ok((status, String::from_utf8(body.to_vec()).context("utf-8 body")?))
    }
}

pub async fn dispatch(
    router: Router,
    method: Method,
    path: &str,
    extra_headers: &[(&str, &str)],
) -> anyhow::Result<(StatusCode, HeaderMap, Bytes)> {
    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header("host", "localhost")
        .body(Body::empty())
        .context("build request")?;

    for (name, value) in extra_headers {
        request.headers_mut().insert(
            name.parse::<HeaderName>().context("parse header name")?,
            value.parse::<HeaderValue>().context("parse header value")?,
        );
    }

    let response = router.oneshot(request).await.context("dispatch request")?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .context("read response body")?;

    Ok((status, headers, body))
}
