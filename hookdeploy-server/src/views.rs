use std::convert::Infallible;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hookdeploy::{VerificationPolicy, VerificationResult};
use log::{error, info, warn};
use tokio_stream::{Stream, StreamExt};
use warp::http::StatusCode;
use warp::path::FullPath;

use crate::dispatch::Directive;
use crate::Hooks;

pub const SIGNED_MESSAGE: &str = "Request body was signed";
pub const ACCEPTED_MESSAGE: &str = "Request accepted";
pub const FORBIDDEN_MESSAGE: &str = "Request body was not signed or verification failed";
pub const NOT_FOUND_MESSAGE: &str = "Not found";
pub const TOO_LARGE_MESSAGE: &str = "Payload too large";

#[derive(Debug)]
pub struct BodyTooLarge {
    pub limit: u64,
}

impl warp::reject::Reject for BodyTooLarge {}

#[derive(Debug)]
pub struct UnreadableBody;

impl warp::reject::Reject for UnreadableBody {}

/// Headers of a webhook delivery that are only used for logging.
#[derive(Debug, Default)]
pub struct Delivery {
    pub id: Option<String>,
    pub event: Option<String>,
}

/// Collects the request body, giving up as soon as it exceeds `limit` bytes.
///
/// A declared `Content-Length` over the limit is refused before reading.
pub async fn read_body<S, B>(
    length: Option<u64>,
    body: S,
    limit: u64,
) -> Result<Bytes, warp::Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    if length.map_or(false, |length| length > limit) {
        return Err(warp::reject::custom(BodyTooLarge { limit }));
    }
    tokio::pin!(body);
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| {
            warn!("Could not read request body: {}", err);
            warp::reject::custom(UnreadableBody)
        })?;
        if (buffer.len() + chunk.remaining()) as u64 > limit {
            return Err(warp::reject::custom(BodyTooLarge { limit }));
        }
        buffer.put(chunk);
    }
    Ok(buffer.freeze())
}

pub async fn post_hook(
    path: FullPath,
    signature: Option<String>,
    delivery: Delivery,
    body: Bytes,
    hooks: Hooks,
) -> Result<impl warp::Reply, Infallible> {
    let route_key = path.as_str();
    info!(
        "Delivery {} ({}) on {}, {} bytes",
        delivery.id.as_deref().unwrap_or("-"),
        delivery.event.as_deref().unwrap_or("-"),
        route_key,
        body.len()
    );
    let policy = hooks.dispatcher.policy(route_key);
    let verification = match policy {
        Some(VerificationPolicy::Required) => hooks.verifier.verify(&body, signature.as_deref()),
        Some(VerificationPolicy::None) => VerificationResult::skipped(),
        None => VerificationResult::failure("unknown route"),
    };
    let (status, message) = match hooks.dispatcher.dispatch(route_key, &verification) {
        Directive::Accepted(_) if policy == Some(VerificationPolicy::None) => {
            (StatusCode::OK, ACCEPTED_MESSAGE)
        }
        Directive::Accepted(_) => (StatusCode::OK, SIGNED_MESSAGE),
        Directive::Forbidden => (StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE),
        Directive::NotFound => (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE),
    };
    Ok(warp::reply::with_status(message, status))
}

/// Terminal responses for requests no handler accepted.
pub async fn rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
    let (status, message) = if err.is_not_found()
        || err.find::<warp::reject::MethodNotAllowed>().is_some()
    {
        (StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
    } else if let Some(BodyTooLarge { limit }) = err.find::<BodyTooLarge>() {
        warn!("Request body over {} bytes refused", limit);
        (StatusCode::PAYLOAD_TOO_LARGE, TOO_LARGE_MESSAGE)
    } else {
        error!("Rejected request: {:?}", err);
        (StatusCode::FORBIDDEN, FORBIDDEN_MESSAGE)
    };
    Ok(warp::reply::with_status(message, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, warp::Error>> {
        let parts: Vec<Result<Bytes, warp::Error>> = parts
            .iter()
            .map(|part| Ok(Bytes::from_static(*part)))
            .collect();
        tokio_stream::iter(parts)
    }

    #[tokio::test]
    async fn body_chunks_are_joined() {
        let body = read_body(None, chunks(&[b"{\"ref\":", b"\"master\"}"]), 64)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"ref\":\"master\"}");
    }

    #[tokio::test]
    async fn body_at_limit_is_accepted() {
        let body = read_body(Some(8), chunks(&[b"1234", b"5678"]), 8).await.unwrap();
        assert_eq!(body.len(), 8);
    }

    #[tokio::test]
    async fn undeclared_oversized_body_is_refused_while_streaming() {
        let err = read_body(None, chunks(&[b"1234", b"5678", b"9"]), 8)
            .await
            .unwrap_err();
        assert_eq!(err.find::<BodyTooLarge>().unwrap().limit, 8);
    }

    #[tokio::test]
    async fn declared_oversized_body_is_refused_before_reading() {
        let err = read_body(Some(64 * 1024 * 1024), chunks(&[]), 1024)
            .await
            .unwrap_err();
        assert!(err.find::<BodyTooLarge>().is_some());
    }

    #[tokio::test]
    async fn missing_body_is_empty() {
        let body = read_body(None, chunks(&[]), 1024).await.unwrap();
        assert!(body.is_empty());
    }
}
