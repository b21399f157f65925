use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

use super::estimate::{estimate_http_request_bytes_parts, response_head_bytes};
use super::util::{has_header, host_header_value, parse_http_url};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1.1 client shared by every request of a run.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // The OS-level TCP connect timeout can be tens of seconds; an unreachable
        // scanner should surface as a failed request well before that.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Turn `req` into a wire request without sending it.
    ///
    /// Fails only for descriptor problems (bad URL, scheme or header), never for
    /// network conditions.
    pub fn prepare(&self, req: &HttpRequest) -> Result<(Request<Full<Bytes>>, u64)> {
        let parsed = parse_http_url(&req.url)?;

        let bytes_sent = estimate_http_request_bytes_parts(
            &req.method,
            &req.url,
            &req.headers,
            req.body.len() as u64,
        )?;

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method.clone()).uri(uri);

        // Host and Content-Length are made explicit so byte accounting matches the wire.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(v)?;
            builder = builder.header(name, value);
        }

        Ok((builder.body(Full::new(req.body.clone()))?, bytes_sent))
    }

    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        let (wire, bytes_sent) = self.prepare(&req)?;

        match req.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(wire, bytes_sent))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => self.exchange(wire, bytes_sent).await,
        }
    }

    async fn exchange(&self, wire: Request<Full<Bytes>>, bytes_sent: u64) -> Result<HttpResponse> {
        let res = self.inner.request(wire).await?;

        let (parts, body) = res.into_parts();
        let head_bytes = response_head_bytes(parts.version, parts.status, &parts.headers);
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            bytes_sent,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::HttpTransportErrorKind;
    use std::time::Instant;

    #[tokio::test]
    async fn unreachable_host_fails_fast_with_connect_timeout() {
        let client = HttpClient::new(Some(Duration::from_millis(200)));
        let req = HttpRequest::get("http://192.0.2.1:81/");

        let started = Instant::now();
        let _err = client.request(req).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(
            elapsed < Duration::from_secs(2),
            "expected fast failure, elapsed={elapsed:?}"
        );
    }

    #[tokio::test]
    async fn prepare_rejects_invalid_header_values() {
        let client = HttpClient::default();
        let req = HttpRequest::get("http://localhost:6060/").with_header("authorization", "a\nb");

        let err = client.prepare(&req).unwrap_err();
        assert_eq!(err.transport_error_kind(), HttpTransportErrorKind::HeaderValue);
    }

    #[tokio::test]
    async fn prepare_adds_host_and_content_length() {
        let client = HttpClient::default();
        let req = HttpRequest::post("http://localhost:6060/x", Bytes::from_static(b"abc"));

        let (wire, _) = client.prepare(&req).unwrap();
        assert_eq!(wire.headers()[http::header::HOST], "localhost:6060");
        assert_eq!(wire.headers()[http::header::CONTENT_LENGTH], "3");
    }
}
