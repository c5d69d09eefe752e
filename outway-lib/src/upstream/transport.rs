//! Shared transport contract.

use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use rand::Rng;

use crate::error::{Error, Result};
use crate::types::Question;

/// One upstream URL's resolved client. Every supported scheme implements
/// this; the pool holds a `Box<dyn Transport>` per configured upstream and
/// never downcasts it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn resolve(&self, q: &Question, timeout: Duration) -> Result<Message>;

    /// Human-readable scheme tag for logs/metrics (`udp`, `tcp`, `tls`,
    /// `quic`, `https`).
    fn scheme(&self) -> &'static str;
}

/// Builds the outbound query message with a randomized id and EDNS0 advertising a
/// 4096-byte buffer.
pub fn build_query(q: &Question) -> Message {
    use hickory_proto::op::{Edns, MessageType, OpCode, Query};
    use hickory_proto::rr::{DNSClass, Name};

    let id: u16 = rand::rng().random();
    let name = Name::from_ascii(&q.name).unwrap_or_else(|_| Name::root());
    let mut query = Query::new();
    query.set_name(name).set_query_type(q.qtype).set_query_class(DNSClass::IN);

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(query);

    let mut edns = Edns::new();
    edns.set_max_payload(4096).set_version(0);
    message.set_edns(edns);
    message
}

/// Validates that the response matches the outbound query: id and question
/// must both match.
pub fn validate_response(query: &Message, response: &Message) -> Result<()> {
    if response.id() != query.id() {
        return Err(Error::Protocol(format!(
            "response id {} does not match query id {}",
            response.id(),
            query.id()
        )));
    }
    let expected = query.queries().first();
    let got = response.queries().first();
    match (expected, got) {
        (Some(e), Some(g)) if e.name() == g.name() && e.query_type() == g.query_type() => Ok(()),
        (None, _) => Ok(()),
        _ => Err(Error::Protocol("response question does not match query".into())),
    }
}

pub fn rcode_is_success(rcode: ResponseCode) -> bool {
    matches!(rcode, ResponseCode::NoError | ResponseCode::NXDomain)
}
