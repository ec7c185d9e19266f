// Chunked JSON streaming utilities
use crate::infrastructure::http_response::brotli;
use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::Stream;
use serde::Serialize;

/// Streams each item as a length-prefixed JSON chunk.
pub fn chunked_json_stream<S, T>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let byte_stream = stream.then(move |item| serialize_chunk(item, compress));
    let body = Body::from_stream(byte_stream);

    // Chunks are compressed one by one, so there is no Content-Encoding on
    // the response itself.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson-chunks")
        .header(header::TRANSFER_ENCODING, "chunked")
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// 4-byte big-endian payload length, then the payload.
pub async fn serialize_chunk<T: Serialize>(item: T, compress: bool) -> std::io::Result<Bytes> {
    let json = serde_json::to_vec(&item).map_err(std::io::Error::other)?;
    let payload = if compress { brotli(json).await? } else { json };

    let mut chunk = BytesMut::with_capacity(4 + payload.len());
    chunk.put_u32(payload.len() as u32);
    chunk.put_slice(&payload);
    Ok(chunk.freeze())
}
