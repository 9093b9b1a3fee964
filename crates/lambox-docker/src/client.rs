//! HTTP/1.1 transport to the Docker Engine API.
//!
//! Each request opens a fresh connection over a Unix socket or TCP, performs
//! a hyper handshake and drives the connection on a spawned task. The engine
//! only sees a handful of calls per function, so there is no pooling.

use std::path::PathBuf;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};

use crate::error::DockerError;
use crate::types::ErrorMessage;

/// Engine API version every path is prefixed with.
const API_VERSION_PREFIX: &str = "/v1.40";

/// Where the engine listens, parsed from a `unix://` or `tcp://` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineHost {
    Unix(PathBuf),
    Tcp(String),
}

impl EngineHost {
    pub fn parse(host: &str) -> Result<Self, DockerError> {
        match host.split_once("://") {
            Some(("unix", path)) if !path.is_empty() => Ok(Self::Unix(PathBuf::from(path))),
            Some(("tcp", addr)) if !addr.is_empty() => Ok(Self::Tcp(addr.to_string())),
            _ => Err(DockerError::InvalidHost(host.to_string())),
        }
    }

    fn authority(&self) -> &str {
        match self {
            EngineHost::Unix(_) => "localhost",
            EngineHost::Tcp(addr) => addr,
        }
    }

    fn target(&self) -> String {
        match self {
            EngineHost::Unix(path) => format!("unix://{}", path.display()),
            EngineHost::Tcp(addr) => format!("tcp://{addr}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineClient {
    host: EngineHost,
}

impl EngineClient {
    pub fn new(host: &str) -> Result<Self, DockerError> {
        Ok(Self {
            host: EngineHost::parse(host)?,
        })
    }

    pub fn host(&self) -> &EngineHost {
        &self.host
    }

    pub async fn get(&self, path: &str) -> Result<Response<Incoming>, DockerError> {
        self.request(Method::GET, path, &[], None).await
    }

    pub async fn post(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response<Incoming>, DockerError> {
        self.request(Method::POST, path, query, None).await
    }

    pub async fn delete(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response<Incoming>, DockerError> {
        self.request(Method::DELETE, path, query, None).await
    }

    pub async fn post_json<T: Serialize>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &T,
    ) -> Result<Response<Incoming>, DockerError> {
        let body = serde_json::to_vec(body)?;
        self.request(Method::POST, path, query, Some(body)).await
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>, DockerError> {
        let uri = build_uri(path, query);
        tracing::debug!(%method, %uri, "Engine request");

        let mut builder = Request::builder()
            .method(method)
            .uri(&uri)
            .header(HOST, self.host.authority());
        let body = match body {
            Some(bytes) => {
                if tracing::enabled!(tracing::Level::TRACE) {
                    tracing::trace!(body = %String::from_utf8_lossy(&bytes), "Engine request body");
                }
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let request = builder.body(body)?;

        let mut sender = self.connect().await?;
        Ok(sender.send_request(request).await?)
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, DockerError> {
        let connect_err = |source| DockerError::Connect {
            target: self.host.target(),
            source,
        };
        match &self.host {
            EngineHost::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(connect_err)?;
                handshake(stream).await
            }
            EngineHost::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).await.map_err(connect_err)?;
                handshake(stream).await
            }
        }
    }
}

async fn handshake<S>(stream: S) -> Result<SendRequest<Full<Bytes>>, DockerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "Engine connection closed with error");
        }
    });
    Ok(sender)
}

fn build_uri(path: &str, query: &[(&str, &str)]) -> String {
    let mut uri = format!("{API_VERSION_PREFIX}{path}");
    if !query.is_empty() {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        uri.push('?');
        uri.push_str(&encoded);
    }
    uri
}

/// Pass 2xx responses through; turn anything else into [`DockerError::Engine`].
pub async fn expect_success(resp: Response<Incoming>) -> Result<Response<Incoming>, DockerError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(engine_error(resp).await)
    }
}

/// Decode a non-2xx response body (`{"message": "..."}`) into an error.
pub async fn engine_error(resp: Response<Incoming>) -> DockerError {
    let status = resp.status().as_u16();
    match resp.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let message = serde_json::from_slice::<ErrorMessage>(&bytes)
                .map(|m| m.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).trim().to_string());
            DockerError::Engine { status, message }
        }
        Err(e) => DockerError::Transport(e),
    }
}

pub async fn read_json<T: DeserializeOwned>(resp: Response<Incoming>) -> Result<T, DockerError> {
    let bytes = resp.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

/// Finite, non-restartable sequence of lines read from a streamed body.
///
/// Used for the newline-delimited progress feed of an image pull. A read
/// error on the body ends the sequence with `Err`; end-of-stream yields any
/// trailing unterminated line and then `None`.
pub struct BodyLines<B> {
    body: B,
    buf: Vec<u8>,
    done: bool,
}

impl<B> BodyLines<B>
where
    B: Body<Data = Bytes> + Unpin,
    DockerError: From<B::Error>,
{
    pub fn new(body: B) -> Self {
        Self {
            body,
            buf: Vec::new(),
            done: false,
        }
    }

    pub async fn next_line(&mut self) -> Result<Option<String>, DockerError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(Some(trim_line(&line)));
            }
            if self.done {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let rest = std::mem::take(&mut self.buf);
                return Ok(Some(trim_line(&rest)));
            }
            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buf.extend_from_slice(&data);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => self.done = true,
            }
        }
    }
}

fn trim_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}
