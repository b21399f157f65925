pub(super) fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

pub(super) fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    // `Url::port` is already `None` for the scheme's default port.
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}

pub(super) fn parse_http_url(raw: &str) -> super::Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|_| super::Error::InvalidUrl(raw.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(super::Error::UnsupportedScheme(raw.to_string())),
    }
}
