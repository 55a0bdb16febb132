//! The registry-v2 failure envelope.
//!
//! Every denial or fault that reaches a client is reported as a
//! [`RegistryV2Error`]: a closed error code with a default HTTP status and
//! message, optionally decorated with detail, a status override, and response
//! headers. Construction always goes through [`RegistryV2ErrorCode::with`] so
//! the code→status table stays the single source of truth.

use std::fmt;

use http::header::{HeaderName, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// The closed set of error codes that can appear in a [`RegistryV2Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryV2ErrorCode {
    #[serde(rename = "BLOB_UNKNOWN")]
    BlobUnknown,
    #[serde(rename = "BLOB_UPLOAD_INVALID")]
    BlobUploadInvalid,
    #[serde(rename = "BLOB_UPLOAD_UNKNOWN")]
    BlobUploadUnknown,
    #[serde(rename = "DIGEST_INVALID")]
    DigestInvalid,
    #[serde(rename = "MANIFEST_BLOB_UNKNOWN")]
    ManifestBlobUnknown,
    #[serde(rename = "MANIFEST_INVALID")]
    ManifestInvalid,
    #[serde(rename = "MANIFEST_UNKNOWN")]
    ManifestUnknown,
    #[serde(rename = "MANIFEST_UNVERIFIED")]
    ManifestUnverified,
    #[serde(rename = "NAME_INVALID")]
    NameInvalid,
    #[serde(rename = "NAME_UNKNOWN")]
    NameUnknown,
    #[serde(rename = "SIZE_INVALID")]
    SizeInvalid,
    #[serde(rename = "TAG_INVALID")]
    TagInvalid,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "DENIED")]
    Denied,
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
    // not in the OCI distribution spec, but emitted by docker-registry
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "TOOMANYREQUESTS")]
    TooManyRequests,
}

impl RegistryV2ErrorCode {
    /// The wire representation of this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlobUnknown => "BLOB_UNKNOWN",
            Self::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            Self::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            Self::DigestInvalid => "DIGEST_INVALID",
            Self::ManifestBlobUnknown => "MANIFEST_BLOB_UNKNOWN",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::ManifestUnknown => "MANIFEST_UNKNOWN",
            Self::ManifestUnverified => "MANIFEST_UNVERIFIED",
            Self::NameInvalid => "NAME_INVALID",
            Self::NameUnknown => "NAME_UNKNOWN",
            Self::SizeInvalid => "SIZE_INVALID",
            Self::TagInvalid => "TAG_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Denied => "DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::Unknown => "UNKNOWN",
            Self::Unavailable => "UNAVAILABLE",
            Self::TooManyRequests => "TOOMANYREQUESTS",
        }
    }

    /// The default human-readable message for this code.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::BlobUnknown => "blob unknown to registry",
            Self::BlobUploadInvalid => "blob upload invalid",
            Self::BlobUploadUnknown => "blob upload unknown to registry",
            Self::DigestInvalid => "provided digest did not match uploaded content",
            Self::ManifestBlobUnknown => "manifest blob unknown to registry",
            Self::ManifestInvalid => "manifest invalid",
            Self::ManifestUnknown => "manifest unknown",
            Self::ManifestUnverified => "manifest failed signature verification",
            Self::NameInvalid => "invalid repository name",
            Self::NameUnknown => "repository name not known to registry",
            Self::SizeInvalid => "provided length did not match content length",
            Self::TagInvalid => "manifest tag did not match URI",
            Self::Unauthorized => "authentication required",
            Self::Denied => "requested access to the resource is denied",
            Self::Unsupported => "operation is unsupported",
            Self::Unknown => "unknown error",
            Self::Unavailable => "registry is currently unavailable",
            Self::TooManyRequests => "too many requests; please slow down",
        }
    }

    /// The default HTTP status for this code, used when no override is set.
    pub fn default_status(self) -> StatusCode {
        match self {
            Self::BlobUnknown => StatusCode::NOT_FOUND,
            Self::BlobUploadInvalid => StatusCode::BAD_REQUEST,
            Self::BlobUploadUnknown => StatusCode::NOT_FOUND,
            Self::DigestInvalid => StatusCode::BAD_REQUEST,
            Self::ManifestBlobUnknown => StatusCode::NOT_FOUND,
            Self::ManifestInvalid => StatusCode::BAD_REQUEST,
            Self::ManifestUnknown => StatusCode::NOT_FOUND,
            Self::ManifestUnverified => StatusCode::BAD_REQUEST,
            Self::NameInvalid => StatusCode::BAD_REQUEST,
            Self::NameUnknown => StatusCode::NOT_FOUND,
            Self::SizeInvalid => StatusCode::BAD_REQUEST,
            Self::TagInvalid => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            // 403 would make more sense, but docker-registry reports 401 here
            // and clients depend on that, so we match it bug-for-bug
            Self::Denied => StatusCode::UNAUTHORIZED,
            Self::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Construct a [`RegistryV2Error`] with this code.
    ///
    /// An empty `message` selects the code's default message.
    pub fn with(self, message: impl Into<String>) -> RegistryV2Error {
        let message = message.into();
        let message =
            if message.is_empty() { self.default_message().to_owned() } else { message };
        RegistryV2Error {
            code: self,
            message,
            detail: None,
            status: None,
            headers: HeaderMap::new(),
        }
    }
}

impl fmt::Display for RegistryV2ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error shape expected by clients of the docker-registry v2 API.
///
/// Values are built once via [`RegistryV2ErrorCode::with`] and then decorated
/// with the builder-style `with_*` methods; a fresh envelope is constructed
/// per failure, never shared between requests.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryV2Error {
    pub code: RegistryV2ErrorCode,
    pub message: String,
    /// Opaque detail payload; a string for errors generated here, but may be
    /// a JSON object for errors relayed from a peer registry.
    pub detail: Option<serde_json::Value>,
    /// Explicit status override; `None` means the code's default status is
    /// resolved at response-writing time and never stored back here.
    #[serde(skip)]
    pub status: Option<StatusCode>,
    #[serde(skip)]
    pub headers: HeaderMap,
}

impl RegistryV2Error {
    /// Attach a detail payload.
    pub fn with_detail(mut self, detail: impl Into<serde_json::Value>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Override the HTTP status for this error.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a response header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// The status this error will be reported with.
    pub fn http_status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.code.default_status())
    }

    /// Coerce an arbitrary error into an envelope.
    ///
    /// Errors that already are a [`RegistryV2Error`] pass through unchanged;
    /// anything else is wrapped under [`RegistryV2ErrorCode::Unknown`] with
    /// the original error text as its message, so the wire contract is always
    /// well-formed.
    pub fn from_error(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        match err.downcast::<RegistryV2Error>() {
            Ok(e) => *e,
            Err(other) => RegistryV2ErrorCode::Unknown.with(other.to_string()),
        }
    }

    /// Render this error in the format used by the registry v2 API.
    ///
    /// `HEAD` requests receive status and headers only, no body.
    pub fn to_registry_v2_response(&self, method: &Method) -> Response<Vec<u8>> {
        #[derive(Serialize)]
        struct Body<'a> {
            errors: [&'a RegistryV2Error; 1],
        }

        let body = if *method == Method::HEAD {
            Vec::new()
        } else {
            let mut buf = serde_json::to_vec(&Body { errors: [self] }).unwrap_or_default();
            buf.push(b'\n');
            buf
        };
        self.build_response(body)
    }

    /// Render this error in the format used by the auth API endpoint.
    pub fn to_auth_response(&self) -> Response<Vec<u8>> {
        let body = serde_json::to_vec(&serde_json::json!({ "details": self.to_string() }))
            .unwrap_or_default();
        self.build_response(body)
    }

    /// Render this error as plain text.
    pub fn to_text_response(&self) -> Response<Vec<u8>> {
        let mut resp = Response::new(format!("{self}\n").into_bytes());
        *resp.status_mut() = self.http_status();
        apply_headers(resp.headers_mut(), &self.headers);
        resp
    }

    fn build_response(&self, body: Vec<u8>) -> Response<Vec<u8>> {
        let mut resp = Response::new(body);
        *resp.status_mut() = self.http_status();
        resp.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // attached headers take precedence over the defaults above
        apply_headers(resp.headers_mut(), &self.headers);
        resp
    }
}

// Copies `source` into `target`, replacing any default for a name the error
// carries while keeping multi-valued headers intact. HeaderMap iteration
// yields same-name values consecutively, so one "last seen name" suffices.
fn apply_headers(target: &mut HeaderMap, source: &HeaderMap) {
    let mut last_name: Option<&HeaderName> = None;
    for (name, value) in source {
        if last_name == Some(name) {
            target.append(name.clone(), value.clone());
        } else {
            target.insert(name.clone(), value.clone());
            last_name = Some(name);
        }
    }
}

impl fmt::Display for RegistryV2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        match &self.detail {
            None => Ok(()),
            Some(serde_json::Value::String(s)) => write!(f, ": {s}"),
            Some(other) => write!(f, ": {other}"),
        }
    }
}

impl std::error::Error for RegistryV2Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_empty_message_uses_default() {
        let err = RegistryV2ErrorCode::ManifestUnknown.with("");
        assert_eq!(err.message, "manifest unknown");
        assert_eq!(err.http_status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn denied_reports_401_not_403() {
        let err = RegistryV2ErrorCode::Denied.with("");
        assert_eq!(err.http_status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn status_override_beats_default() {
        let err = RegistryV2ErrorCode::Unauthorized.with("").with_status(StatusCode::FORBIDDEN);
        assert_eq!(err.http_status(), StatusCode::FORBIDDEN);
        // the override lives on the value; the code's table is untouched
        assert_eq!(RegistryV2ErrorCode::Unauthorized.default_status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn display_joins_message_and_detail() {
        let plain = RegistryV2ErrorCode::DigestInvalid.with("");
        assert_eq!(plain.to_string(), "provided digest did not match uploaded content");

        let detailed = RegistryV2ErrorCode::DigestInvalid.with("").with_detail("sha256:abc");
        assert_eq!(
            detailed.to_string(),
            "provided digest did not match uploaded content: sha256:abc"
        );
    }

    #[test]
    fn foreign_errors_wrap_under_unknown() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "backend exploded");
        let err = RegistryV2Error::from_error(Box::new(inner));
        assert_eq!(err.code, RegistryV2ErrorCode::Unknown);
        assert_eq!(err.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "backend exploded");
    }

    #[test]
    fn envelopes_pass_through_coercion_unchanged() {
        let original = RegistryV2ErrorCode::TooManyRequests
            .with("")
            .with_header(http::header::RETRY_AFTER, HeaderValue::from(30u64));
        let coerced = RegistryV2Error::from_error(Box::new(original));
        assert_eq!(coerced.code, RegistryV2ErrorCode::TooManyRequests);
        assert_eq!(coerced.headers.get(http::header::RETRY_AFTER).unwrap(), "30");
    }

    #[test]
    fn registry_v2_body_shape() {
        let err = RegistryV2ErrorCode::ManifestUnknown.with("");
        let resp = err.to_registry_v2_response(&Method::GET);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "application/json");

        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "errors": [{
                    "code": "MANIFEST_UNKNOWN",
                    "message": "manifest unknown",
                    "detail": null,
                }]
            })
        );
    }

    #[test]
    fn head_requests_get_no_body() {
        let err = RegistryV2ErrorCode::ManifestUnknown.with("");
        let resp = err.to_registry_v2_response(&Method::HEAD);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(resp.body().is_empty());
    }

    #[test]
    fn auth_response_uses_details_key() {
        let err = RegistryV2ErrorCode::Unauthorized.with("token expired");
        let resp = err.to_auth_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body, serde_json::json!({ "details": "token expired" }));
    }

    #[test]
    fn text_response_carries_headers() {
        let err = RegistryV2ErrorCode::TooManyRequests
            .with("")
            .with_header(http::header::RETRY_AFTER, HeaderValue::from(90u64));
        let resp = err.to_text_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(http::header::RETRY_AFTER).unwrap(), "90");
        assert_eq!(resp.body(), b"too many requests; please slow down\n");
    }
}
