use super::util::{has_header, host_header_value, parse_http_url};
use super::{Error, HttpRequest, Result};

/// Estimate bytes sent for an HTTP request.
///
/// Best-effort HTTP/1.1 framing: request line + headers + CRLF + body. Host and
/// Content-Length are counted even when the caller did not set them, since the client
/// always adds them.
pub fn estimate_http_request_bytes(req: &HttpRequest) -> Result<u64> {
    estimate_http_request_bytes_parts(&req.method, &req.url, &req.headers, req.body.len() as u64)
}

pub(super) fn estimate_http_request_bytes_parts(
    method: &http::Method,
    url: &str,
    headers: &[(String, String)],
    body_len: u64,
) -> Result<u64> {
    let parsed = parse_http_url(url)?;
    let uri: hyper::Uri = url
        .parse()
        .map_err(|_| Error::InvalidUrl(url.to_string()))?;

    let mut bytes = request_line_bytes(method, &uri);

    for (k, v) in headers {
        bytes = bytes.saturating_add(header_bytes(k.as_bytes(), v.as_bytes()));
    }

    if !has_header(headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        bytes = bytes.saturating_add(header_bytes(b"host", host.as_bytes()));
    }

    if body_len != 0 && !has_header(headers, "content-length") {
        let v = body_len.to_string();
        bytes = bytes.saturating_add(header_bytes(b"content-length", v.as_bytes()));
    }

    // End of headers.
    Ok(bytes.saturating_add(2).saturating_add(body_len))
}

fn request_line_bytes(method: &http::Method, uri: &hyper::Uri) -> u64 {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    // "METHOD SP path SP HTTP/1.1 CRLF"
    (method.as_str().len() as u64)
        .saturating_add(1)
        .saturating_add(path.len() as u64)
        .saturating_add(1)
        .saturating_add("HTTP/1.1".len() as u64)
        .saturating_add(2)
}

pub(super) fn response_head_bytes(
    version: http::Version,
    status: http::StatusCode,
    headers: &http::HeaderMap,
) -> u64 {
    let version_len: u64 = match version {
        http::Version::HTTP_2 | http::Version::HTTP_3 => 6,
        _ => 8,
    };

    // "HTTP/1.1 SP 200 CRLF", reason phrase ignored.
    let status_line = version_len
        .saturating_add(1)
        .saturating_add(status.as_str().len() as u64)
        .saturating_add(2);

    headers
        .iter()
        .fold(status_line, |acc, (name, value)| {
            acc.saturating_add(header_bytes(name.as_str().as_bytes(), value.as_bytes()))
        })
        .saturating_add(2)
}

fn header_bytes(name: &[u8], value: &[u8]) -> u64 {
    // "name: value\r\n"
    (name.len() as u64)
        .saturating_add(2)
        .saturating_add(value.len() as u64)
        .saturating_add(2)
}
