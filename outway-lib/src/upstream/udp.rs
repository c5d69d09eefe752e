//! Plain UDP/53 transport with automatic TCP fallback on truncation.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_client::udp::UdpClientStream;
use hickory_proto::op::Message;
use hickory_proto::xfer::DnsRequestOptions;

use super::tcp::TcpTransport;
use super::transport::{build_query, rcode_is_success, validate_response, Transport};
use crate::error::{Error, Result};
use crate::types::Question;

pub struct UdpTransport {
    addr: SocketAddr,
    fallback: TcpTransport,
}

impl UdpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            fallback: TcpTransport::new(addr),
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message> {
        let query = build_query(q);
        let stream = UdpClientStream::builder(self.addr, tokio::net::UdpSocket::bind).build();
        let (mut client, bg) =
            tokio::time::timeout(timeout, AsyncClient::connect(stream))
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

        if message.truncated() {
            return self.fallback.resolve(q, timeout).await;
        }

        if !rcode_is_success(message.response_code()) {
            return Err(Error::UpstreamRcode(message.response_code()));
        }
        Ok(message)
    }

    fn scheme(&self) -> &'static str {
        "udp"
    }
}
