//! `GET/OPTIONS/PUT /stream/{message_id}/{token}` — the ranged streaming
//! endpoint and its UPnP probe stubs.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::BytesMut;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::block_source::SharedBlockSource;
use crate::error::{CastError, CastResult};
use crate::range::{admit_range, parse_http_range, AdmittedRange};
use crate::session::table::{SessionTable, TransportId};
use crate::token::LocalToken;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

fn next_transport_id() -> TransportId {
    TransportId(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Shared dependencies the stream handler needs; a slice of the crate's
/// `AppState` so the handler signature stays small.
#[derive(Clone)]
pub struct StreamDeps {
    pub block_source: SharedBlockSource,
    pub session_table: Arc<SessionTable>,
    pub block_size: u64,
}

fn write_access_control_headers(headers: &mut HeaderMap) {
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert("Accept-Ranges", HeaderValue::from_static("bytes"));
    headers.insert("transferMode.dlna.org", HeaderValue::from_static("Streaming"));
    headers.insert(
        "TimeSeekRange.dlna.org",
        HeaderValue::from_static("npt=0.00-"),
    );
}

fn parse_token_path(message_id_raw: &str, token_raw: &str) -> CastResult<(u64, LocalToken)> {
    if !message_id_raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CastError::Unauthorized);
    }
    let message_id: u64 = message_id_raw.parse().map_err(|_| CastError::Unauthorized)?;
    let token = LocalToken::deserialize(token_raw).map_err(|_| CastError::Unauthorized)?;
    if token.message_id != message_id {
        return Err(CastError::Unauthorized);
    }
    Ok((message_id, token))
}

/// `GET /stream/{message_id}/{token}` — admits the token, resolves the
/// document, validates the range, and pumps blocks to the client.
pub async fn stream_handler(
    State(deps): State<StreamDeps>,
    Path((message_id_raw, token_raw)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    match stream_impl(&deps, &message_id_raw, &token_raw, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn stream_impl(
    deps: &StreamDeps,
    message_id_raw: &str,
    token_raw: &str,
    headers: &HeaderMap,
) -> CastResult<Response> {
    let (_message_id, token) = parse_token_path(message_id_raw, token_raw)?;

    if !deps.session_table.is_admitted(&token) {
        return Err(CastError::Forbidden);
    }

    let doc = deps.block_source.get_message(token.message_id).await?;

    let range_header = headers
        .get(axum::http::header::RANGE)
        .and_then(|v| v.to_str().ok());

    let admitted = match range_header {
        Some(raw) => {
            let parsed = parse_http_range(raw, deps.block_size)?;
            admit_range(parsed, doc.size)?
        }
        None => AdmittedRange {
            read_after: 0,
            upper: doc.size,
            size: doc.size,
        },
    };

    let status = if admitted.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut response_headers = HeaderMap::new();
    write_access_control_headers(&mut response_headers);
    response_headers.insert(
        axum::http::header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {}-{}/{}", admitted.read_after, admitted.upper, doc.size))
            .unwrap(),
    );
    response_headers.insert(
        axum::http::header::CONTENT_LENGTH,
        HeaderValue::from_str(&doc.size.to_string()).unwrap(),
    );
    response_headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("video/mp4"),
    );
    response_headers.insert(
        axum::http::header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!(
            "inline; filename=\"{}\"",
            urlencode_filename(&doc.display_filename())
        ))
        .unwrap(),
    );

    let aligned_offset = (admitted.read_after / deps.block_size) * deps.block_size;
    let skip = admitted.read_after - aligned_offset;

    let body = pump_body(
        deps.clone(),
        token,
        doc.size,
        aligned_offset,
        skip,
        admitted.upper,
    );

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    response.headers_mut().extend(response_headers);
    Ok(response)
}

fn urlencode_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c.to_string() } else { format!("%{:02X}", c as u32) })
        .collect()
}

/// The block pump: refreshes the idle debounce, fetches one block at a
/// time, trims the first block's leading `skip` bytes and the last
/// block's tail past `upper`, and tolerates connection errors by ending
/// the stream quietly instead of surfacing a server error.
fn pump_body(
    deps: StreamDeps,
    token: LocalToken,
    size: u64,
    mut offset: u64,
    mut skip: u64,
    upper: u64,
) -> impl futures::Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    async_stream::stream! {
        let transport = next_transport_id();
        deps.session_table.register_transport(token, transport);

        loop {
            deps.session_table.touch(token, size);

            let block = match deps.block_source.get_block(
                &crate::block_source::DocumentRef { message_id: token.message_id, size, filename: None },
                offset,
                deps.block_size,
            ).await {
                Ok(b) => b,
                Err(e) => {
                    log::info!("ending stream for token {} after block fetch error: {}", token, e);
                    break;
                }
            };

            if block.is_empty() {
                break;
            }

            let mut chunk = BytesMut::from(&block[..]);
            if skip > 0 {
                let drop_n = (skip as usize).min(chunk.len());
                chunk = chunk.split_off(drop_n);
                skip = 0;
            }

            if offset + block.len() as u64 > upper {
                let keep = upper.saturating_sub(offset).min(chunk.len() as u64) as usize;
                chunk.truncate(keep);
            }

            if chunk.is_empty() {
                break;
            }

            deps.session_table.observe_block(token, offset);
            offset += block.len() as u64;
            yield Ok(chunk.freeze());

            if offset >= upper {
                break;
            }
        }

        deps.session_table.unregister_transport(token, transport);
    }
}

/// `OPTIONS /stream/{message_id}/{token}` and `PUT /stream/{message_id}/{token}`
/// — UPnP probe stubs: 200 with CORS/DLNA headers, no body.
pub async fn probe_stub() -> Response {
    let mut headers = HeaderMap::new();
    write_access_control_headers(&mut headers);
    let mut response = StatusCode::OK.into_response();
    response.headers_mut().extend(headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_path_rejects_non_digit_message_id() {
        let token = LocalToken::new(7);
        assert!(matches!(
            parse_token_path("abc", &token.to_string()),
            Err(CastError::Unauthorized)
        ));
    }

    #[test]
    fn parse_token_path_rejects_mismatched_message_id() {
        let token = LocalToken::new(7);
        assert!(matches!(
            parse_token_path("8", &token.to_string()),
            Err(CastError::Unauthorized)
        ));
    }

    #[test]
    fn parse_token_path_accepts_matching_pair() {
        let token = LocalToken::new(7);
        let (message_id, parsed) = parse_token_path("7", &token.to_string()).unwrap();
        assert_eq!(message_id, 7);
        assert_eq!(parsed, token);
    }

    #[test]
    fn urlencode_filename_escapes_spaces_and_keeps_safe_chars() {
        assert_eq!(urlencode_filename("my movie.mp4"), "my%20movie.mp4");
    }
}
