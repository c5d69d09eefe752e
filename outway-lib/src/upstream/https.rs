//! DNS-over-HTTPS transport (RFC 8484): POST `application/dns-message`.
//! Built on `reqwest` rather than `hickory_client`'s own h2 stack.

use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use reqwest::Client;

use super::transport::{build_query, rcode_is_success, validate_response, Transport};
use crate::error::{Error, Result};
use crate::types::Question;

const MAX_RESPONSE_BYTES: usize = 65_535;
const MIME_DNS_MESSAGE: &str = "application/dns-message";

pub struct HttpsTransport {
    url: String,
    client: Client,
}

impl HttpsTransport {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(1)
            .http2_prior_knowledge()
            .build()
            .map_err(|e| Error::Internal(format!("building DoH client: {e}")))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message> {
        let query = build_query(q);
        let body = query
            .to_bytes()
            .map_err(|e| Error::Protocol(format!("encoding DoH query: {e}")))?;

        let response = tokio::time::timeout(
            timeout,
            self.client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, MIME_DNS_MESSAGE)
                .header(reqwest::header::ACCEPT, MIME_DNS_MESSAGE)
                .body(body)
                .send(),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::NetworkUnavailable(format!("DoH endpoint returned HTTP {}", response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(Error::Protocol("DoH response exceeds 65535 bytes".into()));
        }

        let message = Message::from_bytes(&bytes).map_err(|e| Error::Protocol(format!("decoding DoH response: {e}")))?;
        validate_response(&query, &message)?;
        if !rcode_is_success(message.response_code()) {
            return Err(Error::UpstreamRcode(message.response_code()));
        }
        Ok(message)
    }

    fn scheme(&self) -> &'static str {
        "https"
    }
}
