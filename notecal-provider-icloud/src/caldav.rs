//! CalDAV client helpers for iCloud using libdav.
//!
//! Every request goes through [`DavCall`], a raw `DavRequest` that hands the
//! status and body back untouched so callers decide what counts as success
//! (a 404 on DELETE, a 207 on PROPFIND).

use http::{Method, StatusCode, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use libdav::CalDavClient;
use libdav::dav::WebDavClient;
use libdav::requests::{DavRequest, ParseResponseError, PreparedRequest};
use notecal_core::error::{SinkError, SinkResult};
use tower::ServiceBuilder;
use tower_http::{auth::AddAuthorization, follow_redirect::FollowRedirect};

use crate::credentials::ICloudCredentials;

/// Type alias for the HTTP client with auth and redirect following.
type HttpClient = FollowRedirect<
    AddAuthorization<
        Client<
            hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
            String,
        >,
    >,
>;

pub type ICloudCalDavClient = CalDavClient<HttpClient>;

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// Create a libdav CalDavClient rooted at `base_url`.
///
/// Basic auth is added to every request and redirects are followed
/// (iCloud redirects to user-specific `pXX-caldav.icloud.com` hosts).
pub fn create_caldav_client(
    base_url: &str,
    credentials: &ICloudCredentials,
) -> SinkResult<ICloudCalDavClient> {
    let uri: Uri = base_url
        .parse()
        .map_err(|e| SinkError::Unavailable(format!("Invalid CalDAV URL {}: {}", base_url, e)))?;

    let https_connector = HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| SinkError::Unavailable(format!("Failed to load native TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    let http_client = Client::builder(TokioExecutor::new()).build(https_connector);
    let auth_client =
        AddAuthorization::basic(http_client, &credentials.apple_id, &credentials.app_password);

    let client = ServiceBuilder::new()
        .layer(tower_http::follow_redirect::FollowRedirectLayer::new())
        .service(auth_client);

    let webdav = WebDavClient::new(uri, client);
    Ok(CalDavClient::new(webdav))
}

/// Build the URL for an event resource.
pub fn event_url(calendar_url: &str, task_id: &str) -> String {
    notecal_core::sink::event_href(calendar_url, task_id)
}

/// Extract the href path from a full URL.
///
/// Converts "https://pXX-caldav.icloud.com/123/calendars/abc/" to "/123/calendars/abc/"
pub fn url_to_href(url: &str) -> String {
    if let Ok(uri) = url.parse::<Uri>() {
        uri.path().to_string()
    } else {
        url.to_string()
    }
}

/// Scheme and authority of a URL, e.g. "https://p01-caldav.icloud.com:443".
pub fn origin(url: &str) -> Option<String> {
    let uri = url.parse::<Uri>().ok()?;
    Some(format!("{}://{}", uri.scheme_str()?, uri.authority()?))
}

/// Resolve an href from a multistatus body against the URL it came from.
pub fn absolute_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match origin(base_url) {
        Some(origin) => format!("{}{}", origin, href),
        None => href.to_string(),
    }
}

/// Same resource, ignoring host and trailing slash.
pub fn same_resource(a: &str, b: &str) -> bool {
    url_to_href(a).trim_end_matches('/') == url_to_href(b).trim_end_matches('/')
}

// ============================================================================
// Raw CalDAV request
// ============================================================================

/// A single WebDAV/CalDAV request whose response is returned as-is.
pub struct DavCall {
    method: &'static str,
    path: String,
    body: String,
    headers: Vec<(String, String)>,
}

/// Status and body of a [`DavCall`].
#[derive(Debug)]
pub struct DavReply {
    pub status: StatusCode,
    pub body: String,
}

impl DavCall {
    pub fn propfind(path: &str, depth: u8, body: &str) -> Self {
        DavCall {
            method: "PROPFIND",
            path: path.to_string(),
            body: body.to_string(),
            headers: vec![
                ("Depth".to_string(), depth.to_string()),
                ("Content-Type".to_string(), XML_CONTENT_TYPE.to_string()),
            ],
        }
    }

    pub fn mkcalendar(path: &str, body: &str) -> Self {
        DavCall {
            method: "MKCALENDAR",
            path: path.to_string(),
            body: body.to_string(),
            headers: vec![("Content-Type".to_string(), XML_CONTENT_TYPE.to_string())],
        }
    }

    /// Unconditional PUT: creates or replaces the resource.
    pub fn put_ics(path: &str, ics: &str) -> Self {
        DavCall {
            method: "PUT",
            path: path.to_string(),
            body: ics.to_string(),
            headers: vec![("Content-Type".to_string(), ICS_CONTENT_TYPE.to_string())],
        }
    }

    pub fn delete(path: &str) -> Self {
        DavCall {
            method: "DELETE",
            path: path.to_string(),
            body: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl DavRequest for DavCall {
    type Response = DavReply;
    type ParseError = ParseResponseError;
    type Error<E> = libdav::dav::WebDavError<E>;

    fn prepare_request(&self) -> std::result::Result<PreparedRequest, http::Error> {
        Ok(PreparedRequest {
            method: Method::from_bytes(self.method.as_bytes())?,
            path: self.path.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        })
    }

    fn parse_response(
        &self,
        parts: &http::response::Parts,
        body: &[u8],
    ) -> std::result::Result<Self::Response, ParseResponseError> {
        let body = std::str::from_utf8(body)?.to_string();
        Ok(DavReply {
            status: parts.status,
            body,
        })
    }
}

/// Send a call and return the raw reply. Only transport failures are errors.
pub async fn send(client: &ICloudCalDavClient, call: DavCall) -> SinkResult<DavReply> {
    let method = call.method();
    let path = call.path().to_string();
    client.request(call).await.map_err(|e| {
        SinkError::Unavailable(format!("{} {} failed: {}", method, path, e))
    })
}

/// Map a non-success status onto a sink error.
pub fn check_status(reply: &DavReply, what: &str) -> SinkResult<()> {
    let status = reply.status;
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error() {
        return Err(SinkError::Unavailable(format!(
            "{} failed with status {}",
            what, status
        )));
    }

    let message = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            format!("{}: iCloud rejected the credentials (check the app-specific password)", what)
        }
        _ => format!("{}: {}", what, snippet(&reply.body)),
    };
    Err(SinkError::Rejected {
        status: status.as_u16(),
        message,
    })
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
