//! Minimal JSON-over-HTTP client shared by device drivers.
//!
//! One request, one response, no retries. Retry policy belongs to the
//! controller's backoff, not to the transport.

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, ShutterError};

/// `User-Agent` sent with every device request.
pub fn user_agent() -> String {
    format!("ShutterOperator/{}", env!("CARGO_PKG_VERSION"))
}

/// Structured error body a device API may return on non-2xx responses.
pub trait ApiError: DeserializeOwned {
    fn message(&self) -> String;
}

type ErrorDecoder = fn(u16, &[u8]) -> Option<ShutterError>;

fn decode_api_error<E: ApiError>(status: u16, body: &[u8]) -> Option<ShutterError> {
    let err: E = serde_json::from_slice(body).ok()?;
    Some(ShutterError::Api {
        status,
        message: err.message(),
    })
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    endpoint: Url,
    client: reqwest::Client,
    decode_error: Option<ErrorDecoder>,
}

impl HttpClient {
    /// Bind a client to `endpoint`. The endpoint always ends in exactly one
    /// `/` so request paths resolve relative to it.
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self> {
        let normalized = format!("{}/", endpoint.trim_end_matches('/'));
        let endpoint =
            Url::parse(&normalized).map_err(|_| ShutterError::InvalidEndpoint(endpoint.to_string()))?;
        Ok(Self {
            endpoint,
            client,
            decode_error: None,
        })
    }

    /// Decode non-2xx bodies as `E`. Bodies that don't match fall back to a
    /// generic HTTP error carrying status and raw body.
    pub fn with_api_error<E: ApiError>(mut self) -> Self {
        self.decode_error = Some(decode_api_error::<E>);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        self.execute::<(), T>(Method::GET, path, params, None).await
    }

    pub async fn execute<P, T>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        payload: Option<&P>,
    ) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        // trim leading slash to always be relative to the endpoint
        let url = self
            .endpoint
            .join(path.trim_start_matches('/'))
            .map_err(|_| ShutterError::InvalidEndpoint(format!("{}{path}", self.endpoint)))?;

        let mut req = self
            .client
            .request(method, url.clone())
            .header(USER_AGENT, user_agent())
            .header(CONTENT_TYPE, "application/json");
        if !params.is_empty() {
            req = req.query(params);
        }
        if let Some(payload) = payload {
            req = req.body(serde_json::to_vec(payload)?);
        }

        let res = req.send().await?;
        let status = res.status();
        let body = res.bytes().await?;

        if !status.is_success() {
            let code = status.as_u16();
            if let Some(api_err) = self.decode_error.and_then(|decode| decode(code, &body[..])) {
                return Err(api_err);
            }
            return Err(ShutterError::Http {
                status: code,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        tracing::trace!(%url, status = status.as_u16(), "device response");
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        ok: bool,
    }

    #[derive(Debug, Deserialize)]
    struct TestApiError {
        error: String,
    }

    impl ApiError for TestApiError {
        fn message(&self) -> String {
            self.error.clone()
        }
    }

    #[test]
    fn endpoint_gets_single_trailing_slash() {
        let c = HttpClient::new(reqwest::Client::new(), "http://10.0.0.5/api//").unwrap();
        assert_eq!(c.endpoint().as_str(), "http://10.0.0.5/api/");
        let c = HttpClient::new(reqwest::Client::new(), "http://10.0.0.5").unwrap();
        assert_eq!(c.endpoint().as_str(), "http://10.0.0.5/");
    }

    #[test]
    fn rejects_garbage_endpoint() {
        let err = HttpClient::new(reqwest::Client::new(), "not a url").unwrap_err();
        assert!(matches!(err, ShutterError::InvalidEndpoint(_)));
    }

    #[tokio::test]
    async fn sends_identifying_headers_and_decodes_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/base/ping")
            .match_header("content-type", "application/json")
            .match_header("user-agent", Matcher::Regex("^ShutterOperator/".into()))
            .match_query(Matcher::UrlEncoded("x".into(), "1".into()))
            .with_status(200)
            .with_body(r#"{"ok": true}"#)
            .create_async()
            .await;

        let c = HttpClient::new(reqwest::Client::new(), &format!("{}/base", server.url())).unwrap();
        let pong: Pong = c.get("/ping", &[("x", "1".to_string())]).await.unwrap();
        assert_eq!(pong, Pong { ok: true });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_without_decoder_is_generic_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;

        let c = HttpClient::new(reqwest::Client::new(), &server.url()).unwrap();
        let err = c.get::<Pong>("ping", &[]).await.unwrap_err();
        match err {
            ShutterError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_2xx_with_decoder_is_structured_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(400)
            .with_body(r#"{"error": "bad roller_pos"}"#)
            .create_async()
            .await;

        let c = HttpClient::new(reqwest::Client::new(), &server.url())
            .unwrap()
            .with_api_error::<TestApiError>();
        let err = c.get::<Pong>("ping", &[]).await.unwrap_err();
        match err {
            ShutterError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad roller_pos");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_error_shape_falls_back_to_raw_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(400)
            .with_body("Bad roller_pos!")
            .create_async()
            .await;

        let c = HttpClient::new(reqwest::Client::new(), &server.url())
            .unwrap()
            .with_api_error::<TestApiError>();
        let err = c.get::<Pong>("ping", &[]).await.unwrap_err();
        assert!(matches!(err, ShutterError::Http { status: 400, .. }));
        assert!(err.to_string().contains("Bad roller_pos!"));
    }

    #[tokio::test]
    async fn malformed_success_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let c = HttpClient::new(reqwest::Client::new(), &server.url()).unwrap();
        let err = c.get::<Pong>("ping", &[]).await.unwrap_err();
        assert!(matches!(err, ShutterError::Json(_)));
    }
}
