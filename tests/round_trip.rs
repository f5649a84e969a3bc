use bytes::Bytes;
use http::{Request, Response, StatusCode, header, response};
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use http_snappy::{
    CompressionLayer, DecoderPool, DecompressionLayer, EncoderPool, SNAPPY, has_token,
};
use std::convert::Infallible;
use std::io;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt, service_fn};

const BODY_LEN: usize = 65536;

type Body = BoxBody<Bytes, io::Error>;
type HttpService = BoxCloneService<Request<Full<Bytes>>, Response<Body>, Infallible>;

async fn handler(_req: Request<Full<Bytes>>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = Bytes::from(vec![0u8; BODY_LEN]);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, BODY_LEN.to_string())
        .body(Full::new(body))
        .unwrap())
}

fn server(enabled: bool, pool: &EncoderPool) -> HttpService {
    let handler = service_fn(handler);
    if enabled {
        let service = CompressionLayer::new().pool(pool.clone()).layer(handler);
        BoxCloneService::new(service.map_response(|res| res.map(|body| body.boxed())))
    } else {
        BoxCloneService::new(handler.map_response(|res| {
            res.map(|body| body.map_err(|never| match never {}).boxed())
        }))
    }
}

fn client(enabled: bool, pool: &DecoderPool, server: HttpService) -> HttpService {
    if enabled {
        let service = DecompressionLayer::new().pool(pool.clone()).layer(server);
        BoxCloneService::new(service.map_response(|res| res.map(|body| body.boxed())))
    } else {
        server
    }
}

fn request(accept_encoding: Option<&'static str>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().uri("http://localhost/");
    if let Some(value) = accept_encoding {
        builder = builder.header(header::ACCEPT_ENCODING, value);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

async fn exchange(service: HttpService, req: Request<Full<Bytes>>) -> (response::Parts, Bytes) {
    let response = service.oneshot(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    (parts, body)
}

async fn run(server_enabled: bool, client_enabled: bool) -> (response::Parts, Bytes) {
    let encoders = EncoderPool::default();
    let decoders = DecoderPool::default();
    let service = client(client_enabled, &decoders, server(server_enabled, &encoders));
    exchange(service, request(None)).await
}

fn vary(parts: &response::Parts) -> Option<&str> {
    parts.headers.get(header::VARY).map(|v| v.to_str().unwrap())
}

#[tokio::test]
async fn test_disabled() {
    let (parts, body) = run(false, false).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(!has_token(parts.headers.get_all(header::CONTENT_ENCODING)));
    assert!(vary(&parts).is_none());
    assert_eq!(parts.headers.get(header::CONTENT_LENGTH).unwrap(), "65536");
    assert_eq!(body.len(), BODY_LEN);
}

#[tokio::test]
async fn test_client_only() {
    let (parts, body) = run(false, true).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(!has_token(parts.headers.get_all(header::CONTENT_ENCODING)));
    assert_eq!(parts.headers.get(header::CONTENT_LENGTH).unwrap(), "65536");
    assert_eq!(body, vec![0u8; BODY_LEN]);
}

#[tokio::test]
async fn test_server_only() {
    let (parts, body) = run(true, false).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(vary(&parts).unwrap().contains("Accept-Encoding"));
    assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(parts.headers.get(header::CONTENT_LENGTH).unwrap(), "65536");
    assert_eq!(body, vec![0u8; BODY_LEN]);
}

#[tokio::test]
async fn test_enabled() {
    let (parts, body) = run(true, true).await;

    assert_eq!(parts.status, StatusCode::OK);
    assert!(vary(&parts).unwrap().contains("Accept-Encoding"));
    assert!(has_token(parts.headers.get_all(header::CONTENT_ENCODING)));
    assert_eq!(parts.headers.get(header::CONTENT_ENCODING).unwrap(), SNAPPY);
    assert!(parts.headers.get(header::CONTENT_LENGTH).is_none());
    assert_eq!(body.len(), BODY_LEN);
    assert!(body.iter().all(|b| *b == 0));
}

#[tokio::test]
async fn test_wire_bytes_are_snappy_framed() {
    let encoders = EncoderPool::default();
    let (parts, wire) = exchange(server(true, &encoders), request(Some("gzip, snappy"))).await;

    assert_eq!(parts.headers.get(header::CONTENT_ENCODING).unwrap(), SNAPPY);
    assert!(wire.starts_with(b"\xff\x06\x00\x00sNaPpY"));
    assert!(wire.len() < BODY_LEN);
}

#[tokio::test]
async fn test_unrelated_accept_encoding_is_not_compressed() {
    let encoders = EncoderPool::default();
    let (parts, body) = exchange(server(true, &encoders), request(Some("gzip, br"))).await;

    assert!(parts.headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(body.len(), BODY_LEN);
    assert_eq!(encoders.created(), 0);
}

#[tokio::test]
async fn test_sequential_requests_reuse_pooled_state() {
    let encoders = EncoderPool::default();
    let decoders = DecoderPool::default();
    let service = client(true, &decoders, server(true, &encoders));

    for _ in 0..32 {
        let (parts, body) = exchange(service.clone(), request(None)).await;
        assert_eq!(parts.headers.get(header::CONTENT_ENCODING).unwrap(), SNAPPY);
        assert_eq!(body.len(), BODY_LEN);
    }

    assert_eq!(encoders.created(), 1);
    assert_eq!(decoders.created(), 1);
    assert_eq!(encoders.idle(), 1);
    assert_eq!(decoders.idle(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_bound_pool_growth() {
    const TASKS: usize = 8;
    const REQUESTS: usize = 16;

    let encoders = EncoderPool::default();
    let decoders = DecoderPool::default();
    let service = client(true, &decoders, server(true, &encoders));

    let mut handles = Vec::with_capacity(TASKS);
    for _ in 0..TASKS {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..REQUESTS {
                let (_, body) = exchange(service.clone(), request(None)).await;
                assert_eq!(body.len(), BODY_LEN);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(encoders.created() <= TASKS);
    assert!(decoders.created() <= TASKS);
    assert_eq!(encoders.idle(), encoders.created());
    assert_eq!(decoders.idle(), decoders.created());
}
