//! Plain TCP/53 transport with 2-byte length-prefix framing (handled by
//! `hickory_client`'s `TcpClientStream`).

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_client::client::{AsyncClient, ClientHandle};
use hickory_client::tcp::TcpClientStream;
use hickory_proto::op::Message;
use hickory_proto::xfer::DnsRequestOptions;

use super::transport::{build_query, rcode_is_success, validate_response, Transport};
use crate::error::{Error, Result};
use crate::types::Question;

pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message> {
        let query = build_query(q);
        let (stream, sender) = TcpClientStream::<tokio::net::TcpStream>::with_timeout(self.addr, timeout);
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
        "tcp"
    }
}

