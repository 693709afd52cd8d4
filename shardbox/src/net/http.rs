//! HTTP/1.1 connection service.
//!
//! One connection, one request: responses always carry
//! `Connection: close`. The pipeline here is the part that runs before
//! dispatch: IP filter, authentication, rate limiting, and the body and
//! header limits.

use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

use crate::auth::{self, authenticate};
use crate::config::config;
use crate::dispatch::{path_segments, ApiError, Args, Context, Dispatcher, Kind, RequestParts};
use crate::limiter::Taken;

/// Serve one client connection.
pub async fn serve<S>(
    stream: S,
    peer: IpAddr,
    ctx: Context,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), super::Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let config = config();
    let io = TokioIo::new(stream);

    let service = service_fn(move |request| {
        let ctx = ctx.clone();
        let dispatcher = dispatcher.clone();
        async move { handle(ctx, dispatcher, peer, request).await }
    });

    http1::Builder::new()
        .keep_alive(false)
        .timer(TokioTimer::new())
        .header_read_timeout(config.config.general.header_read_timeout())
        .max_buf_size(config.config.memory.max_headers)
        .serve_connection(io, service)
        .await?;

    Ok(())
}

async fn handle(
    ctx: Context,
    dispatcher: Arc<Dispatcher>,
    peer: IpAddr,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    // Banned peers are cut off before anything else.
    if ctx.ip_filter.is_banned(peer) && !ctx.ip_filter.is_allowed(peer) {
        return Ok(respond_error(
            &ApiError::new(Kind::AuthInvalid, "address is banned"),
            None,
        ));
    }

    let token = header_str(&request, "token");
    let authorization = header_str(&request, AUTHORIZATION.as_str());

    let authed = match authenticate(&ctx.users, token.as_deref(), authorization.as_deref()) {
        Ok(authed) => authed,
        Err(err) => {
            // Failed credentials raise the peer's abuse counter.
            if matches!(err, auth::Error::Invalid) {
                ctx.ip_filter.flag(peer);
            }
            return Ok(respond_error(&err.into(), None));
        }
    };

    let taken = authed.user.allow_processing();
    if !taken.fit {
        return Ok(respond_error(
            &ApiError::new(Kind::RateLimited, "rate limit exceeded"),
            Some(taken),
        ));
    }

    let (parts, body) = request.into_parts();

    let json_content = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase().starts_with("application/json"))
        .unwrap_or(false);

    let max_body = config().config.memory.max_body;
    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(declared) = declared {
        if declared > max_body {
            return Ok(respond_error(
                &ApiError::new(Kind::PayloadTooLarge, "request body exceeds 8 MiB"),
                Some(taken),
            ));
        }
    }

    let body = match Limited::new(body, max_body).collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            // Bodies must announce themselves.
            if !bytes.is_empty() && declared.is_none() {
                return Ok(respond_error(
                    &ApiError::new(Kind::PayloadRequired, "Content-Length is required"),
                    Some(taken),
                ));
            }
            if bytes.is_empty() {
                None
            } else {
                Some(bytes)
            }
        }
        Err(_) => {
            return Ok(respond_error(
                &ApiError::new(Kind::PayloadTooLarge, "request body exceeds 8 MiB"),
                Some(taken),
            ));
        }
    };

    let request_parts = RequestParts {
        method: parts.method.clone(),
        segments: path_segments(parts.uri.path()),
        args: Args::parse(parts.uri.query()),
        json_content,
        body,
        authed,
    };

    let result = dispatcher.dispatch(&ctx, request_parts).await;

    Ok(match result {
        Ok(value) => respond_ok(value, Some(taken)),
        Err(err) => {
            if err.kind == Kind::Internal {
                error!(%peer, "request failed: {}", err);
            } else {
                debug!(%peer, "request rejected: {}", err);
            }
            respond_error(&err, Some(taken))
        }
    })
}

fn header_str(request: &Request<Incoming>, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn base_response(status: StatusCode, rate: Option<Taken>) -> hyper::http::response::Builder {
    let mut builder = Response::builder()
        .status(status)
        .header("Connection", "close")
        .header(CONTENT_TYPE, "application/json");

    if let Some(taken) = rate {
        builder = builder
            .header("Ratelimit-Limit", taken.limit)
            .header("Ratelimit-Remaining", taken.remaining)
            .header("Ratelimit-Reset", taken.reset);
    }

    builder
}

fn respond_ok(value: Value, rate: Option<Taken>) -> Response<Full<Bytes>> {
    let body = value.to_string();
    base_response(StatusCode::OK, rate)
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn respond_error(err: &ApiError, rate: Option<Taken>) -> Response<Full<Bytes>> {
    let body = json!({"error": err.kind.tag()}).to_string();

    base_response(err.status(), rate)
        .header("Internal-Status", err.kind.tag())
        .header("Additional-Information", sanitize_header(&err.detail))
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Header values can't carry control characters; collapse anything odd.
fn sanitize_header(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .take(256)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_header() {
        assert_eq!(sanitize_header("plain text"), "plain text");
        assert_eq!(sanitize_header("line\nbreak"), "line_break");
        assert_eq!(sanitize_header("tab\there"), "tab_here");
    }

    #[test]
    fn test_error_response_headers() {
        let err = ApiError::new(Kind::NotFound, "record not found");
        let response = respond_error(&err, None);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Internal-Status").unwrap(),
            "not_found"
        );
        assert_eq!(response.headers().get("Connection").unwrap(), "close");
    }

    #[test]
    fn test_rate_headers() {
        let taken = Taken {
            fit: true,
            limit: 10,
            remaining: 7,
            reset: 123,
        };
        let response = respond_ok(json!({}), Some(taken));
        assert_eq!(response.headers().get("Ratelimit-Limit").unwrap(), "10");
        assert_eq!(response.headers().get("Ratelimit-Remaining").unwrap(), "7");
        assert_eq!(response.headers().get("Ratelimit-Reset").unwrap(), "123");
    }
}
