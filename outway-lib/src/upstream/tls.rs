//! DNS-over-TLS transport (RFC 7858).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_proto::op::Message;
use hickory_proto::rustls::tls_client_stream::tls_client_connect_with_future;
use hickory_proto::xfer::DnsRequestOptions;

use super::transport::{build_query, rcode_is_success, validate_response, Transport};
use crate::error::{Error, Result};
use crate::types::Question;

pub struct TlsTransport {
    addr: SocketAddr,
    server_name: String,
    tls_config: Arc<rustls::ClientConfig>,
}

impl TlsTransport {
    pub fn new(addr: SocketAddr, server_name: String) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        Self {
            addr,
            server_name,
            tls_config,
        }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message> {
        let query = build_query(q);
        let dns_name = self
            .server_name
            .clone()
            .try_into()
            .map_err(|_| Error::InvalidInput(format!("invalid TLS server name: {}", self.server_name)))?;

        let connect = tls_client_connect_with_future(
            self.addr,
            Box::new(|socket_addr, _| {
                Box::pin(async move { tokio::net::TcpStream::connect(socket_addr).await })
            }),
            dns_name,
            self.tls_config.clone(),
        );

        let (stream, sender) = connect;
        let (mut client, bg) = tokio::time::timeout(timeout, AsyncClient::new(stream, sender, None))
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
        "tls"
    }
}
