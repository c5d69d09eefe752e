//! DNS server front-end: binds UDP/TCP listeners via `hickory-server`'s
//! `ServerFuture`, validates incoming requests, drives them through the
//! resolver chain and policy engine, and reports a `QueryOutcome` for every
//! query.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::op::{Header, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{DNSClass, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};

use crate::error::Error;
use crate::history::History;
use crate::metrics::global as metrics;
use crate::policy::PolicyEngine;
use crate::resolver::{resolve_chain, QueryContext, Resolver};
use crate::types::{Question, QueryOutcome, SourceTag};

const EDNS0_MAX_PAYLOAD: u16 = 4096;
const NON_EDNS0_MAX_PAYLOAD: usize = 512;

pub struct Handler {
    chain: Vec<Box<dyn Resolver>>,
    policy: Arc<PolicyEngine>,
    history: Arc<History>,
    query_timeout: Duration,
    sequence: AtomicU64,
}

impl Handler {
    pub fn new(chain: Vec<Box<dyn Resolver>>, policy: Arc<PolicyEngine>, history: Arc<History>, query_timeout: Duration) -> Self {
        Self {
            chain,
            policy,
            history,
            query_timeout,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    async fn answer(&self, q: &Question) -> Result<(hickory_proto::op::Message, SourceTag), Error> {
        let ctx = QueryContext::new(Instant::now() + self.query_timeout);
        match resolve_chain(&self.chain, &ctx, q).await? {
            Some(outcome) => {
                self.policy.apply(&q.name, &outcome.message).await;
                Ok((outcome.message, outcome.source))
            }
            None => Err(Error::Internal("no resolver produced an answer".into())),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(&self, request: &Request, mut response_handle: R) -> ResponseInfo {
        let seq = self.next_sequence();
        let span = tracing::info_span!("query", seq, client = %request.src());
        let _enter = span.enter();
        let start = Instant::now();

        metrics().queries_total.increment();
        metrics().inflight_queries.add(1);
        let outcome = self.dispatch(request, &mut response_handle).await;
        metrics().inflight_queries.add(-1);

        if let Some(q) = outcome.query {
            self.history.record(QueryOutcome {
                fqdn: q.name,
                qtype: q.qtype,
                source: outcome.source,
                rcode: outcome.rcode,
                answer_count: outcome.answer_count,
                elapsed: start.elapsed(),
            });
        }
        outcome.response_info
    }
}

struct DispatchOutcome {
    response_info: ResponseInfo,
    query: Option<Question>,
    source: Option<SourceTag>,
    rcode: ResponseCode,
    answer_count: usize,
}

fn count_source(source: SourceTag) {
    let m = metrics();
    match source {
        SourceTag::Hosts => m.queries_hosts.increment(),
        SourceTag::Lan => m.queries_lan.increment(),
        SourceTag::Cache => m.queries_cache.increment(),
        SourceTag::Upstream => m.queries_upstream.increment(),
    }
}

impl Handler {
    async fn dispatch<R: ResponseHandler>(&self, request: &Request, response_handle: &mut R) -> DispatchOutcome {
        let message = request.message();

        if message.message_type() != MessageType::Query || message.op_code() != OpCode::Query {
            let info = self.reply_error(request, response_handle, ResponseCode::NotImp).await;
            return DispatchOutcome {
                response_info: info,
                query: None,
                source: None,
                rcode: ResponseCode::NotImp,
                answer_count: 0,
            };
        }

        let queries = message.queries();
        if queries.len() != 1 {
            let info = self.reply_error(request, response_handle, ResponseCode::FormErr).await;
            return DispatchOutcome {
                response_info: info,
                query: None,
                source: None,
                rcode: ResponseCode::FormErr,
                answer_count: 0,
            };
        }
        let query = &queries[0];
        if query.query_class() != DNSClass::IN || !matches!(query.query_type(), RecordType::A | RecordType::AAAA) {
            let info = self.reply_error(request, response_handle, ResponseCode::NotImp).await;
            return DispatchOutcome {
                response_info: info,
                query: None,
                source: None,
                rcode: ResponseCode::NotImp,
                answer_count: 0,
            };
        }

        let q = Question::new(&query.name().to_ascii(), query.query_type());

        match self.answer(&q).await {
            Ok((answer_message, source)) => {
                let rcode = answer_message.response_code();
                let answer_count = answer_message.answer_count() as usize;
                count_source(source);
                let info = self.reply_success(request, response_handle, &answer_message).await;
                DispatchOutcome {
                    response_info: info,
                    query: Some(q),
                    source: Some(source),
                    rcode,
                    answer_count,
                }
            }
            Err(e) => {
                metrics().queries_errored.increment();
                tracing::warn!(error = %e, "query failed");
                let rcode = e.to_rcode();
                let info = self.reply_error(request, response_handle, rcode).await;
                DispatchOutcome {
                    response_info: info,
                    query: Some(q),
                    source: None,
                    rcode,
                    answer_count: 0,
                }
            }
        }
    }

    async fn reply_error<R: ResponseHandler>(&self, request: &Request, response_handle: &mut R, rcode: ResponseCode) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(rcode);
        let header_for_fallback = header.clone();
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build_no_records(header);
        response_handle.send_response(response).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to send error response");
            ResponseInfo::from(header_for_fallback)
        })
    }

    async fn reply_success<R: ResponseHandler>(&self, request: &Request, response_handle: &mut R, answer: &hickory_proto::op::Message) -> ResponseInfo {
        let max_payload = edns_max_payload(request);
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(answer.response_code());
        header.set_authoritative(answer.authoritative());

        let mut answers: Vec<_> = answer.answers().to_vec();
        let truncated = max_payload.is_none() && estimate_size(&answers) > NON_EDNS0_MAX_PAYLOAD;
        if truncated {
            answers.clear();
            header.set_truncated(true);
        }

        let header_for_fallback = header.clone();
        let builder = MessageResponseBuilder::from_message_request(request);
        let response = builder.build(
            header,
            answers.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );
        response_handle.send_response(response).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to send success response");
            ResponseInfo::from(header_for_fallback)
        })
    }
}

fn edns_max_payload(request: &Request) -> Option<u16> {
    request.edns().map(|edns| edns.max_payload().min(EDNS0_MAX_PAYLOAD))
}

fn estimate_size(answers: &[hickory_proto::rr::Record]) -> usize {
    // Rough per-record estimate (name + fixed RR header + RDATA) good enough
    // to decide whether truncation is needed without a full wire encode.
    answers.iter().map(|r| 32 + r.data().map(|d| d.to_string().len()).unwrap_or(0)).sum()
}

pub struct DnsServer {
    inner: ServerFuture<Handler>,
}

impl DnsServer {
    pub async fn bind(handler: Handler, udp_addr: SocketAddr, tcp_addr: SocketAddr, tcp_timeout: Duration) -> std::io::Result<Self> {
        let mut server = ServerFuture::new(handler);
        let udp_socket = UdpSocket::bind(udp_addr).await?;
        server.register_socket(udp_socket);
        let tcp_listener = TcpListener::bind(tcp_addr).await?;
        server.register_listener(tcp_listener, tcp_timeout);
        Ok(Self { inner: server })
    }

    pub async fn block_until_done(self) -> std::io::Result<()> {
        self.inner.block_until_done().await
    }

    pub fn shutdown_gracefully(&mut self) {
        self.inner.shutdown_gracefully();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_size_is_nonzero_for_answers() {
        use hickory_proto::rr::rdata::A;
        use hickory_proto::rr::{Name, RData, Record};
        let record = Record::from_rdata(Name::from_ascii("example.com").unwrap(), 60, RData::A(A("1.2.3.4".parse().unwrap())));
        assert!(estimate_size(&[record]) > 0);
    }
}
