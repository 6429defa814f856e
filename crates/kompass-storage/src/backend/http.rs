//! HTTP plumbing shared by the cloud adapters.

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::error::BackendError;

pub(crate) fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Io(format!("failed to build HTTP client: {e}")))
}

/// Attach a bearer token when one is configured.
pub(crate) fn authorize(req: RequestBuilder, token: Option<&SecretString>) -> RequestBuilder {
    match token {
        Some(token) => req.bearer_auth(token.expose_secret()),
        None => req,
    }
}

/// Parse a base endpoint and append path segments, percent-encoding each.
pub(crate) fn endpoint_url(base: &str, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = Url::parse(base)
        .map_err(|e| BackendError::Rejected {
            status: 0,
            message: format!("invalid endpoint '{base}': {e}"),
        })?;
    url.path_segments_mut()
        .map_err(|_| BackendError::Rejected {
            status: 0,
            message: format!("endpoint '{base}' cannot carry a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map a non-success response onto the adapter error taxonomy.
///
/// 404 is `NotFound`; auth failures, throttling, request timeouts and
/// server errors are `Unavailable`; any other status is `Rejected`.
pub(crate) async fn check_status(resp: Response, what: &str) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, what, body))
}

pub(crate) fn status_error(status: StatusCode, what: &str, body: String) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(what.to_string()),
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => {
            BackendError::Unavailable(format!("{what}: HTTP {status}"))
        }
        s if s.is_server_error() => BackendError::Unavailable(format!("{what}: HTTP {status}")),
        s => BackendError::Rejected {
            status: s.as_u16(),
            message: body,
        },
    }
}
