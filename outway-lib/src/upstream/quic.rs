//! DNS-over-QUIC transport (RFC 9250), ALPN "doq".

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_proto::op::Message;
use hickory_proto::quic::QuicClientStream;
use hickory_proto::xfer::DnsRequestOptions;

use super::transport::{build_query, rcode_is_success, validate_response, Transport};
use crate::error::{Error, Result};
use crate::types::Question;

pub struct QuicTransport {
    addr: SocketAddr,
    server_name: String,
    tls_config: Arc<rustls::ClientConfig>,
}

impl QuicTransport {
    pub fn new(addr: SocketAddr, server_name: String) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls_config.alpn_protocols = vec![b"doq".to_vec()];
        Self {
            addr,
            server_name,
            tls_config: Arc::new(tls_config),
        }
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message> {
        let query = build_query(q);

        let stream = QuicClientStream::builder()
            .crypto_config(self.tls_config.as_ref().clone())
            .build(self.addr, self.server_name.clone());

        let stream = tokio::time::timeout(timeout, stream)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        let (mut client, bg) = tokio::time::timeout(timeout, AsyncClient::connect(stream))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
        tokio::spawn(bg);

        let response = tokio::time::timeout(
            timeout,
            client.send(hickory_proto::xfer::DnsRequest::new(query.clone(), DnsRequestOptions::default())),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;

        let message: Message = response.into();
        validate_response(&query, &message)?;
        if !rcode_is_success(message.response_code()) {
            return Err(Error::UpstreamRcode(message.response_code()));
        }
        Ok(message)
    }

    fn scheme(&self) -> &'static str {
        "quic"
    }
}
