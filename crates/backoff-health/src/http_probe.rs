//! HTTP health probe.
//!
//! Sends one request and checks the status (exact match if configured,
//! any 2xx otherwise) and, optionally, that some line of the body
//! contains a keyword. `https` URLs go through rustls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri, header};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::error::ProbeError;
use crate::threshold::{Probe, ProbeFuture};

/// Client type used by [`HttpProbe`].
pub type HttpClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

const MAX_REDIRECTS: usize = 10;
/// Longest body line the keyword scan will buffer.
pub const MAX_LINE_LEN: usize = 64 * 1024;
const USER_AGENT: &str = concat!("backoff-health/", env!("CARGO_PKG_VERSION"));

/// Dropped when a redirect leaves the original host.
const SENSITIVE_HEADERS: [HeaderName; 3] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

/// What to request and how to judge the response.
#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    /// Bound on the whole probe, body included.
    pub timeout: Option<Duration>,
    /// Off by default: a 3xx is judged as-is.
    pub follow_redirect: bool,
    /// Exact status required. `None` accepts any 2xx.
    pub status_code: Option<StatusCode>,
    /// Must appear within a single line of the body.
    pub keyword: Option<String>,
    /// Accept any server certificate. Only read by [`HttpProbe::new`].
    pub insecure: bool,
}

impl HttpProbeConfig {
    pub fn new(url: Uri) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            timeout: None,
            follow_redirect: false,
            status_code: None,
            keyword: None,
            insecure: false,
        }
    }
}

/// Client without connection reuse; every probe dials fresh.
///
/// Speaks plain `http` and `https`. Certificates are checked against the
/// webpki roots unless `insecure` is set.
pub fn default_client(insecure: bool) -> Result<HttpClient, ProbeError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config(insecure)?)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Ok(Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(connector))
}

fn tls_config(insecure: bool) -> Result<rustls::ClientConfig, ProbeError> {
    let builder =
        rustls::ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()?;

    let config = if insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    };
    Ok(config)
}

#[derive(Clone)]
pub struct HttpProbe {
    config: HttpProbeConfig,
    client: HttpClient,
}

impl HttpProbe {
    pub fn new(config: HttpProbeConfig) -> Result<Self, ProbeError> {
        let client = default_client(config.insecure)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: HttpProbeConfig, client: HttpClient) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &HttpProbeConfig {
        &self.config
    }

    /// Run the probe once.
    pub async fn probe(&self) -> Result<(), ProbeError> {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, self.execute())
                .await
                .map_err(|_| ProbeError::Timeout(limit))?,
            None => self.execute().await,
        }
    }

    async fn execute(&self) -> Result<(), ProbeError> {
        let response = self.send().await?;
        self.check_status(response.status())?;

        let body = response.into_body();
        match &self.config.keyword {
            Some(keyword) => {
                if scan_lines(body, keyword).await? {
                    Ok(())
                } else {
                    Err(ProbeError::KeywordNotFound(keyword.clone()))
                }
            }
            None => drain(body).await,
        }
    }

    async fn send(&self) -> Result<Response<Incoming>, ProbeError> {
        let mut method = self.config.method.clone();
        let mut uri = self.config.url.clone();
        let mut headers = self.config.headers.clone();
        let mut redirects = 0;

        loop {
            let response = self
                .client
                .request(build_request(&method, &uri, &headers)?)
                .await?;
            if !self.config.follow_redirect || redirects >= MAX_REDIRECTS {
                return Ok(response);
            }

            // 301, 302 and 303 turn anything but GET and HEAD into GET.
            let keep_method = match response.status() {
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => {
                    method == Method::GET || method == Method::HEAD
                }
                StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => true,
                _ => return Ok(response),
            };
            let Some(next) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|location| location.to_str().ok())
                .and_then(|location| resolve_location(&uri, location))
            else {
                return Ok(response);
            };

            if !keep_method {
                method = Method::GET;
            }
            if next.authority() != uri.authority() {
                for name in &SENSITIVE_HEADERS {
                    headers.remove(name);
                }
            }
            debug!(from = %uri, to = %next, %method, "following redirect");
            uri = next;
            redirects += 1;
        }
    }

    fn check_status(&self, status: StatusCode) -> Result<(), ProbeError> {
        let accepted = match self.config.status_code {
            Some(expected) => status == expected,
            None => status.is_success(),
        };
        if accepted {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedHttpStatus(status.as_u16()))
        }
    }
}

impl Probe for HttpProbe {
    fn check(&self) -> ProbeFuture<'_> {
        Box::pin(self.probe())
    }
}

fn build_request(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Request<Empty<Bytes>>, ProbeError> {
    let mut request = Request::builder()
        .method(method.clone())
        .uri(uri.clone())
        .body(Empty::new())?;
    *request.headers_mut() = headers.clone();
    request
        .headers_mut()
        .entry(header::USER_AGENT)
        .or_insert(HeaderValue::from_static(USER_AGENT));
    Ok(request)
}

/// Resolve a `Location` value against the URI it came from (RFC 3986 §5.2).
fn resolve_location(base: &Uri, location: &str) -> Option<Uri> {
    let location = location.split_once('#').map_or(location, |(head, _)| head);
    if let Ok(uri) = location.parse::<Uri>() {
        if uri.scheme().is_some() {
            return Some(uri);
        }
    }
    if location.starts_with("//") {
        return format!("{}:{location}", base.scheme_str()?).parse().ok();
    }

    let (path, query) = match location.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (location, None),
    };
    let (path, query) = if path.is_empty() {
        (base.path().to_string(), query.or(base.query()))
    } else if path.starts_with('/') {
        (remove_dot_segments(path), query)
    } else {
        let base_path = base.path();
        let dir = base_path.rfind('/').map_or("/", |i| &base_path[..=i]);
        (remove_dot_segments(&format!("{dir}{path}")), query)
    };

    let path_and_query = match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Collapse `.` and `..` segments of an absolute path.
fn remove_dot_segments(path: &str) -> String {
    let mut output: Vec<&str> = Vec::new();
    let mut segments = path.split('/').skip(1).peekable();
    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            other => {
                output.push(other);
                continue;
            }
        }
        if last {
            output.push("");
        }
    }
    format!("/{}", output.join("/"))
}

/// Whether any line of `body` contains `keyword`.
///
/// A line longer than [`MAX_LINE_LEN`] ends the scan without a match.
async fn scan_lines(mut body: Incoming, keyword: &str) -> Result<bool, ProbeError> {
    let mut line = Vec::new();
    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };
        for chunk in data.split_inclusive(|b| *b == b'\n') {
            line.extend_from_slice(chunk);
            if line.len() > MAX_LINE_LEN {
                debug!(limit = MAX_LINE_LEN, "response line too long for keyword scan");
                return Ok(false);
            }
            if line.ends_with(b"\n") {
                if line_contains(&line, keyword) {
                    return Ok(true);
                }
                line.clear();
            }
        }
    }
    Ok(line_contains(&line, keyword))
}

fn line_contains(line: &[u8], keyword: &str) -> bool {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\r', '\n'])
        .contains(keyword)
}

async fn drain(mut body: Incoming) -> Result<(), ProbeError> {
    while let Some(frame) = body.frame().await {
        frame?;
    }
    Ok(())
}

/// Verifier behind [`HttpProbeConfig::insecure`].
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
