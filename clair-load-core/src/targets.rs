use std::time::Duration;

use bytes::Bytes;
use clair_load_http::HttpRequest;

use crate::error::{Error, Result};
use crate::sequence::Workload;

const INDEX_REPORT_PATH: &str = "/indexer/api/v1/index_report";
const INDEX_REPORT_BY_HASH_PATH: &str = "/indexer/api/v1/index_report/{hash}";
const VULNERABILITY_REPORT_BY_HASH_PATH: &str = "/matcher/api/v1/vulnerability_report/{hash}";
const HASH_PLACEHOLDER: &str = "{hash}";
const INDEX_STATE_PATH: &str = "/indexer/api/v1/index_state";

/// One scanning-API operation. Each is run as its own attack.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    #[strum(serialize = "post_index_report")]
    CreateIndexReport,
    GetIndexReport,
    GetVulnerabilityReport,
    GetIndexerState,
    DeleteIndexReport,
}

impl Operation {
    /// Run order of a full test. Deletion is last so every read sees the created reports.
    pub const SEQUENCE: [Operation; 5] = [
        Operation::CreateIndexReport,
        Operation::GetIndexReport,
        Operation::GetVulnerabilityReport,
        Operation::GetIndexerState,
        Operation::DeleteIndexReport,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn method(self) -> http::Method {
        match self {
            Self::CreateIndexReport => http::Method::POST,
            Self::DeleteIndexReport => http::Method::DELETE,
            Self::GetIndexReport | Self::GetVulnerabilityReport | Self::GetIndexerState => {
                http::Method::GET
            }
        }
    }

    /// Path relative to the scanner host, `{hash}` marking the per-request part.
    #[must_use]
    pub fn path_template(self) -> &'static str {
        match self {
            Self::CreateIndexReport => INDEX_REPORT_PATH,
            Self::GetIndexReport | Self::DeleteIndexReport => INDEX_REPORT_BY_HASH_PATH,
            Self::GetVulnerabilityReport => VULNERABILITY_REPORT_BY_HASH_PATH,
            Self::GetIndexerState => INDEX_STATE_PATH,
        }
    }

    /// The path for one request, with `{hash}` filled in.
    #[must_use]
    pub fn path(self, hash: &str) -> String {
        self.path_template().replace(HASH_PLACEHOLDER, hash)
    }

    /// Build this operation's targets for one resolved batch.
    pub fn targets(self, endpoint: &Endpoint, workload: &Workload) -> Result<TargetSet> {
        match self {
            Self::CreateIndexReport => TargetSet::create_index_reports(endpoint, &workload.manifests),
            Self::GetIndexReport => TargetSet::get_index_reports(endpoint, &workload.hashes),
            Self::GetVulnerabilityReport => {
                TargetSet::get_vulnerability_reports(endpoint, &workload.hashes)
            }
            Self::GetIndexerState => {
                TargetSet::get_indexer_state(endpoint, workload.manifests.len())
            }
            Self::DeleteIndexReport => TargetSet::delete_index_reports(endpoint, &workload.hashes),
        }
    }
}

/// Scanner base URL plus the bearer token every request carries.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    token: String,
}

impl Endpoint {
    /// Rejects anything that is not an absolute `http://` or `https://` URL.
    pub fn new(host: &str, token: impl Into<String>) -> Result<Self> {
        let host = host.trim().trim_end_matches('/');
        let parsed =
            url::Url::parse(host).map_err(|e| Error::InvalidHost(format!("{host}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(Error::InvalidHost(format!(
                "{host}: only http:// and https:// hosts are supported"
            )));
        }
        Ok(Self {
            host: host.to_string(),
            token: token.into(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    /// Headers shared by every request, in a fixed order.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), format!("Bearer {}", self.token)),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]
    }
}

/// A validated, immutable HTTP request to replay during an attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: http::Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(
        method: http::Method,
        url: impl Into<String>,
        headers: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> Result<Self> {
        let url = url.into();

        if method != http::Method::GET
            && method != http::Method::POST
            && method != http::Method::DELETE
        {
            return Err(Error::InvalidTarget(format!("unsupported method {method}")));
        }
        if method == http::Method::GET && body.is_some() {
            return Err(Error::InvalidTarget(format!("GET {url} cannot carry a body")));
        }

        let parsed =
            url::Url::parse(&url).map_err(|e| Error::InvalidTarget(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidTarget(format!(
                "{url}: only http:// and https:// are supported"
            )));
        }

        for (name, value) in &headers {
            http::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidTarget(format!("header `{name}`: {e}")))?;
            http::header::HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidTarget(format!("header `{name}` value: {e}")))?;
        }

        Ok(Self {
            method,
            url,
            headers,
            body,
        })
    }

    pub fn get(url: impl Into<String>, headers: Vec<(String, String)>) -> Result<Self> {
        Self::new(http::Method::GET, url, headers, None)
    }

    pub fn method(&self) -> &http::Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub(crate) fn to_http_request(&self, timeout: Duration) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone().unwrap_or_default(),
            timeout: Some(timeout),
        }
    }
}

/// The non-empty batch of requests for one attack.
#[derive(Debug, Clone)]
pub struct TargetSet {
    label: String,
    requests: Vec<RequestDescriptor>,
}

impl TargetSet {
    pub fn new(label: impl Into<String>, requests: Vec<RequestDescriptor>) -> Result<Self> {
        let label = label.into();
        if requests.is_empty() {
            return Err(Error::EmptyTargetSet { operation: label });
        }
        Ok(Self { label, requests })
    }

    /// One POST per manifest, body = manifest.
    pub fn create_index_reports(endpoint: &Endpoint, manifests: &[Bytes]) -> Result<Self> {
        let op = Operation::CreateIndexReport;
        log_preparing(op, manifests.len());

        let url = endpoint.url(op.path_template());
        let headers = endpoint.headers();
        let requests = manifests
            .iter()
            .map(|m| {
                RequestDescriptor::new(op.method(), url.clone(), headers.clone(), Some(m.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(op.label(), requests)
    }

    pub fn get_index_reports(endpoint: &Endpoint, hashes: &[String]) -> Result<Self> {
        Self::per_hash(Operation::GetIndexReport, endpoint, hashes)
    }

    pub fn get_vulnerability_reports(endpoint: &Endpoint, hashes: &[String]) -> Result<Self> {
        Self::per_hash(Operation::GetVulnerabilityReport, endpoint, hashes)
    }

    pub fn delete_index_reports(endpoint: &Endpoint, hashes: &[String]) -> Result<Self> {
        Self::per_hash(Operation::DeleteIndexReport, endpoint, hashes)
    }

    /// `count` identical polls of the indexer state, so polling load tracks batch size.
    pub fn get_indexer_state(endpoint: &Endpoint, count: usize) -> Result<Self> {
        let op = Operation::GetIndexerState;
        log_preparing(op, count);

        let request = RequestDescriptor::get(endpoint.url(op.path_template()), endpoint.headers())?;
        Self::new(op.label(), vec![request; count])
    }

    fn per_hash(op: Operation, endpoint: &Endpoint, hashes: &[String]) -> Result<Self> {
        log_preparing(op, hashes.len());

        let headers = endpoint.headers();
        let requests = hashes
            .iter()
            .map(|hash| {
                RequestDescriptor::new(op.method(), endpoint.url(&op.path(hash)), headers.clone(), None)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(op.label(), requests)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RequestDescriptor> {
        self.requests.iter()
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a RequestDescriptor;
    type IntoIter = std::slice::Iter<'a, RequestDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn log_preparing(op: Operation, count: usize) {
    tracing::debug!(
        operation = op.label(),
        method = %op.method(),
        count,
        "preparing requests"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("http://clair:6060/", "tok").unwrap_or_else(|e| panic!("{e}"))
    }

    fn hashes() -> Vec<String> {
        vec!["sha256:aaa".to_string(), "sha256:bbb".to_string()]
    }

    #[test]
    fn create_posts_each_manifest_to_the_same_url() {
        let manifests = vec![Bytes::from_static(b"{\"a\":1}"), Bytes::from_static(b"{\"b\":2}")];
        let set = TargetSet::create_index_reports(&endpoint(), &manifests)
            .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(set.label(), "post_index_report");
        assert_eq!(set.len(), 2);
        for (req, manifest) in set.iter().zip(&manifests) {
            assert_eq!(req.method(), http::Method::POST);
            assert_eq!(req.url(), "http://clair:6060/indexer/api/v1/index_report");
            assert_eq!(req.body(), Some(manifest));
        }
    }

    #[test]
    fn retrieval_and_deletion_append_the_hash() {
        let e = endpoint();

        let get = TargetSet::get_index_reports(&e, &hashes()).unwrap_or_else(|e| panic!("{e}"));
        let urls: Vec<&str> = get.iter().map(RequestDescriptor::url).collect();
        assert_eq!(
            urls,
            vec![
                "http://clair:6060/indexer/api/v1/index_report/sha256:aaa",
                "http://clair:6060/indexer/api/v1/index_report/sha256:bbb",
            ]
        );
        assert!(get.iter().all(|r| r.body().is_none()));

        let vuln = TargetSet::get_vulnerability_reports(&e, &hashes())
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            vuln.iter().next().map(RequestDescriptor::url),
            Some("http://clair:6060/matcher/api/v1/vulnerability_report/sha256:aaa")
        );

        let del = TargetSet::delete_index_reports(&e, &hashes()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(del.label(), "delete_index_report");
        assert!(del.iter().all(|r| r.method() == http::Method::DELETE));
    }

    #[test]
    fn indexer_state_repeats_one_get_per_batch_item() {
        let set = TargetSet::get_indexer_state(&endpoint(), 3).unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(set.len(), 3);
        let first = set.iter().next().cloned();
        assert!(set.iter().all(|r| Some(r) == first.as_ref()));
        assert_eq!(
            first.as_ref().map(RequestDescriptor::url),
            Some("http://clair:6060/indexer/api/v1/index_state")
        );
    }

    #[test]
    fn headers_carry_bearer_token_and_json_content_type() {
        let set = TargetSet::get_index_reports(&endpoint(), &hashes()).unwrap_or_else(|e| panic!("{e}"));
        for req in &set {
            assert_eq!(
                req.headers(),
                &[
                    ("Authorization".to_string(), "Bearer tok".to_string()),
                    ("Content-Type".to_string(), "application/json".to_string()),
                ]
            );
        }
    }

    #[test]
    fn empty_identifier_lists_are_configuration_errors() {
        let e = endpoint();

        let err = TargetSet::get_index_reports(&e, &[]).err();
        assert!(matches!(err, Some(Error::EmptyTargetSet { ref operation }) if operation == "get_index_report"));

        assert!(TargetSet::create_index_reports(&e, &[]).is_err());
        assert!(TargetSet::get_indexer_state(&e, 0).is_err());
        assert!(err.is_some_and(|e| e.is_configuration()));
    }

    #[test]
    fn endpoint_rejects_hosts_that_are_not_http() {
        for bad in ["ftp://scanner", "scanner:6060", "not a url", "", "http://"] {
            let err = Endpoint::new(bad, "tok").err();
            assert!(
                matches!(err, Some(Error::InvalidHost(_))),
                "{bad:?} should be rejected, got {err:?}"
            );
            assert!(err.is_some_and(|e| e.is_configuration()));
        }

        let e = Endpoint::new(" https://clair.example:8443// ", "tok").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(e.host(), "https://clair.example:8443");
        assert_eq!(e.url("/x"), "https://clair.example:8443/x");
    }

    #[test]
    fn paths_fill_in_the_hash() {
        assert_eq!(
            Operation::GetVulnerabilityReport.path("sha256:abc"),
            "/matcher/api/v1/vulnerability_report/sha256:abc"
        );
        assert_eq!(
            Operation::GetIndexerState.path("sha256:abc"),
            "/indexer/api/v1/index_state"
        );
    }

    #[test]
    fn descriptors_are_validated() {
        assert!(RequestDescriptor::get("not a url", vec![]).is_err());
        assert!(RequestDescriptor::get("ftp://clair/x", vec![]).is_err());
        assert!(
            RequestDescriptor::get("http://clair/x", vec![("bad header".into(), "v".into())])
                .is_err()
        );
        assert!(
            RequestDescriptor::new(
                http::Method::GET,
                "http://clair/x",
                vec![],
                Some(Bytes::from_static(b"x"))
            )
            .is_err()
        );
        assert!(RequestDescriptor::new(http::Method::PUT, "http://clair/x", vec![], None).is_err());
    }

    #[test]
    fn operation_labels_round_trip() {
        for op in Operation::SEQUENCE {
            let parsed: Operation = op.label().parse().unwrap_or_else(|e| panic!("{e}"));
            assert_eq!(parsed, op);
        }
        assert_eq!(Operation::GetIndexerState.to_string(), "get_indexer_state");
    }
}
