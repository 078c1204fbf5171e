//! The capability that actually performs requests.

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::StatusCode;
use serde_json::Value;
use tracing::debug;

use super::request::{ResponseType, TransferRequest};
use super::response::{HttpErrorResponse, HttpEvent, TransferResponse};

/// Events of one in-flight request, ending in a response or a failure.
pub type TransportStream = BoxStream<'static, Result<HttpEvent, HttpErrorResponse>>;

pub trait Transport: Send + Sync {
    fn handle(&self, request: TransferRequest) -> TransportStream;
}

impl<F> Transport for F
where
    F: Fn(TransferRequest) -> TransportStream + Send + Sync,
{
    fn handle(&self, request: TransferRequest) -> TransportStream {
        self(request)
    }
}

/// Outbound transport backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn handle(&self, request: TransferRequest) -> TransportStream {
        let client = self.client.clone();
        stream! {
            yield Ok(HttpEvent::Sent);
            match send(&client, request).await {
                Ok(response) => yield Ok(HttpEvent::Response(response)),
                Err(failure) => yield Err(failure),
            }
        }
        .boxed()
    }
}

async fn send(
    client: &reqwest::Client,
    request: TransferRequest,
) -> Result<TransferResponse, HttpErrorResponse> {
    let url = request.url_with_params();
    let mut builder = client
        .request(request.method.clone(), url.as_str())
        .headers(request.headers.clone());
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|err| network_failure(&url, &err))?;

    let status = response.status();
    let headers = response.headers().clone();
    let final_url = response.url().to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| network_failure(&url, &err))?;
    let body = decode_body(&bytes, request.response_type);

    debug!(status = status.as_u16(), url = %final_url, "transport response received");

    let status_text = status.canonical_reason().unwrap_or_default().to_string();
    if status.is_client_error() || status.is_server_error() {
        return Err(HttpErrorResponse {
            error: body,
            headers,
            status: status.as_u16(),
            status_text,
            url: Some(final_url),
        });
    }

    Ok(TransferResponse {
        body,
        headers,
        status,
        status_text,
        url: Some(final_url),
    })
}

fn decode_body(bytes: &[u8], response_type: ResponseType) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    let text = || Value::String(String::from_utf8_lossy(bytes).into_owned());
    match response_type {
        ResponseType::Json => Some(serde_json::from_slice(bytes).unwrap_or_else(|_| text())),
        ResponseType::Text => Some(text()),
    }
}

fn network_failure(url: &str, err: &reqwest::Error) -> HttpErrorResponse {
    let status = err.status().map_or(0, |status: StatusCode| status.as_u16());
    HttpErrorResponse::new(status, "Unknown Error", Some(Value::String(err.to_string())))
        .with_url(url)
}
