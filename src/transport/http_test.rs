use std::collections::HashMap;
use std::io::{Read, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use reqwest::Url;

use super::*;

#[derive(Clone, Default)]
struct Store {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Store {
    fn with(key: &str, data: Vec<u8>) -> Self {
        let store = Self::default();
        store.objects.lock().unwrap().insert(key.to_string(), data);
        store
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

fn range_start(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::RANGE)?
        .to_str()
        .ok()?
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .parse()
        .ok()
}

async fn get_ranged(State(store): State<Store>, Path(key): Path<String>, headers: HeaderMap) -> Response {
    let Some(data) = store.get(&key) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match range_start(&headers) {
        Some(start) if start < data.len() => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, data.len() - 1, data.len()),
                ),
            ],
            data[start..].to_vec(),
        )
            .into_response(),
        Some(_) => StatusCode::RANGE_NOT_SATISFIABLE.into_response(),
        None => ([(header::ACCEPT_RANGES, "bytes")], data).into_response(),
    }
}

async fn get_plain(State(store): State<Store>, Path(key): Path<String>) -> Response {
    match store.get(&key) {
        Some(data) => data.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_object(State(store): State<Store>, Path(key): Path<String>, body: Bytes) -> StatusCode {
    store.objects.lock().unwrap().insert(key, body.to_vec());
    StatusCode::OK
}

async fn forbidden(_body: Bytes) -> StatusCode {
    StatusCode::FORBIDDEN
}

async fn serve(store: Store) -> Url {
    let app = Router::new()
        .route("/objects/{key}", get(get_ranged).put(put_object))
        .route("/plain/{key}", get(get_plain))
        .route("/readonly/{key}", put(forbidden))
        .with_state(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_streams_and_seeks_with_ranges() -> anyhow::Result<()> {
    let data = pattern(300_000);
    let base = serve(Store::with("clip", data.clone())).await;

    let mut reader = HttpReader::open(Client::new(), base.join("objects/clip")?, None).await?;
    assert!(reader.seekable());
    assert_eq!(reader.len(), Some(300_000));

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mut head = vec![0u8; 1000];
        reader.read_exact(&mut head)?;
        assert_eq!(head, &data[..1000]);

        assert_eq!(reader.seek(SeekFrom::Start(250_000))?, 250_000);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest)?;
        assert_eq!(rest, &data[250_000..]);

        assert_eq!(reader.seek(SeekFrom::End(-10))?, 299_990);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail)?;
        assert_eq!(tail, &data[299_990..]);

        // Seeking to the end yields EOF without another request.
        assert_eq!(reader.seek(SeekFrom::End(0))?, 300_000);
        let mut none = [0u8; 16];
        assert_eq!(reader.read(&mut none)?, 0);

        assert!(reader.seek(SeekFrom::Current(-400_000)).is_err());

        reader.close()?;
        assert!(reader.read(&mut none).is_err());
        Ok(())
    })
    .await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reader_without_ranges_is_sequential() -> anyhow::Result<()> {
    let data = pattern(70_000);
    let base = serve(Store::with("clip", data.clone())).await;

    let mut reader = HttpReader::open(Client::new(), base.join("plain/clip")?, None).await?;
    assert!(!reader.seekable());

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let err = reader.seek(SeekFrom::Start(10)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        assert_eq!(body, data);
        reader.close()?;
        Ok(())
    })
    .await??;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_object_fails_to_open() -> anyhow::Result<()> {
    let base = serve(Store::default()).await;
    let err = match HttpReader::open(Client::new(), base.join("objects/nope")?, None).await {
        Ok(_) => panic!("missing object opened"),
        Err(e) => e,
    };
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn writer_commits_on_close() -> anyhow::Result<()> {
    let store = Store::default();
    let base = serve(store.clone()).await;
    let data = pattern(200_000);

    let mut writer = HttpWriter::open(Client::new(), base.join("objects/out")?, None);
    assert!(!writer.seekable());

    let body = data.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        for chunk in body.chunks(4096) {
            writer.write_all(chunk)?;
        }
        writer.close()?;
        // A second close is a no-op.
        writer.close()?;
        Ok(())
    })
    .await??;

    assert_eq!(store.get("out"), Some(data));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn writer_abort_does_not_commit() -> anyhow::Result<()> {
    let store = Store::default();
    let base = serve(store.clone()).await;

    let mut writer = HttpWriter::open(Client::new(), base.join("objects/out")?, None);
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        writer.write_all(&pattern(10_000))?;
        writer.abort();
        assert!(writer.write(b"late").is_err());
        Ok(())
    })
    .await??;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.get("out"), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_upload_fails_on_close() -> anyhow::Result<()> {
    let base = serve(Store::default()).await;

    let mut writer = HttpWriter::open(Client::new(), base.join("readonly/out")?, None);
    let result = tokio::task::spawn_blocking(move || {
        writer
            .write_all(&pattern(1000))
            .and_then(|_| writer.close())
    })
    .await?;

    let err = result.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    Ok(())
}
