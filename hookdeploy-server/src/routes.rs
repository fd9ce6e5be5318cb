use hookdeploy::{DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use warp::Filter;
use warp::Reply;

use crate::views;
use crate::Hooks;

pub fn routes(
    hooks: Hooks,
) -> impl Filter<Extract = (impl Reply,), Error = std::convert::Infallible> + Clone {
    let post_hook = warp::post()
        .and(warp::path::full())
        .and(warp::header::optional::<String>(SIGNATURE_HEADER))
        .and(delivery())
        .and(body(hooks.max_body))
        .and(with_hooks(hooks))
        .and_then(views::post_hook);
    post_hook.recover(views::rejection)
}

fn delivery() -> impl Filter<Extract = (views::Delivery,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>(DELIVERY_HEADER)
        .and(warp::header::optional::<String>(EVENT_HEADER))
        .map(|id, event| views::Delivery { id, event })
}

fn body(limit: u64) -> impl Filter<Extract = (bytes::Bytes,), Error = warp::Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(move |length, stream| views::read_body(length, stream, limit))
}

fn with_hooks(
    hooks: Hooks,
) -> impl Filter<Extract = (Hooks,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hooks.clone())
}
