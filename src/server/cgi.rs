use std::{env, path::Path};

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, Response, header},
    response::IntoResponse,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;
use tracing::warn;

use super::{ApiError, ROUTE_PREFIX};

/// Endpoint named by the invoking script, e.g. `/cgi-bin/configs.sh` -> `configs`.
pub fn endpoint_from_env() -> Option<String> {
    env::var("SCRIPT_NAME")
        .ok()
        .and_then(|script| endpoint_from_script(&script))
}

fn endpoint_from_script(script: &str) -> Option<String> {
    Path::new(script)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Request line and length as announced by the web server.
#[derive(Debug, Clone)]
struct CgiEnv {
    method: String,
    content_length: usize,
    query: String,
}

impl CgiEnv {
    fn from_env() -> Self {
        Self {
            method: env::var("REQUEST_METHOD").unwrap_or_else(|_| "GET".to_string()),
            content_length: content_length(env::var("CONTENT_LENGTH").ok().as_deref()),
            query: env::var("QUERY_STRING").unwrap_or_default(),
        }
    }
}

/// Serve the single request described by the CGI environment and stdin.
pub async fn run_once(app: Router, endpoint: &str, body_limit: usize) -> Result<()> {
    let out = respond(app, endpoint, &CgiEnv::from_env(), tokio::io::stdin(), body_limit).await?;
    write_stdout(&out).await
}

/// Answer with a 500 when no router could be built for this request.
pub async fn run_failed(err: anyhow::Error) -> Result<()> {
    let out = render(transport_error(ApiError::internal(err))).await?;
    write_stdout(&out).await
}

async fn write_stdout(out: &[u8]) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(out).await?;
    stdout.flush().await?;
    Ok(())
}

/// Read at most `CONTENT_LENGTH` bytes (and never more than one byte past
/// `body_limit`), dispatch, and render. A short body is passed on as read.
async fn respond<R>(
    app: Router,
    endpoint: &str,
    cgi: &CgiEnv,
    reader: R,
    body_limit: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let want = cgi.content_length.min(body_limit.saturating_add(1));
    let mut body = Vec::new();
    if let Err(err) = reader.take(want as u64).read_to_end(&mut body).await {
        let err = anyhow::Error::new(err).context("failed to read request body");
        return render(transport_error(ApiError::internal(err))).await;
    }
    if body.len() < want {
        warn!(declared = cgi.content_length, read = body.len(), "request body shorter than CONTENT_LENGTH");
    }

    let request = match build_request(&cgi.method, endpoint, &cgi.query, body) {
        Ok(request) => request,
        Err(err) => return render(transport_error(ApiError::bad_request(format!("{err:#}")))).await,
    };
    let response = app.oneshot(request).await?;
    render(response).await
}

/// Error raised before the router saw the request, with the headers every answer carries.
fn transport_error(err: ApiError) -> Response<Body> {
    let mut response = err.into_response();
    let headers = response.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn content_length(raw: Option<&str>) -> usize {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => 0,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(value, "ignoring unparsable CONTENT_LENGTH");
            0
        }),
    }
}

fn build_request(method: &str, endpoint: &str, query: &str, body: Vec<u8>) -> Result<Request<Body>> {
    let uri = if query.is_empty() {
        format!("{ROUTE_PREFIX}/{endpoint}")
    } else {
        format!("{ROUTE_PREFIX}/{endpoint}?{query}")
    };
    Request::builder()
        .method(method)
        .uri(&uri)
        .body(Body::from(body))
        .with_context(|| format!("invalid CGI request {method} {uri}"))
}

/// CGI wire form: `Status:` line, headers, blank line, body.
async fn render(response: Response<Body>) -> Result<Vec<u8>> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .context("failed to collect response body")?;

    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(
        format!(
            "Status: {} {}\r\n",
            parts.status.as_u16(),
            parts.status.canonical_reason().unwrap_or("")
        )
        .as_bytes(),
    );
    for (name, value) in &parts.headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body);
    Ok(out)
}
