//! Query handling.
//!
//! [`QueryHandler`] is the seam between transport and policy; the
//! [`FilterHandler`] implementation wires the classifier, the forwarder,
//! and the query-log sink into the per-question pipeline from the wire
//! spec: first blocked question wins with NXDOMAIN, a forwarder failure
//! stops the loop with SERVFAIL, everything else accumulates answers.

use crate::query_log::QueryLogSink;
use async_trait::async_trait;
use chrono::Utc;
use sentra_classify::Classifier;
use sentra_metrics::metrics;
use sentra_proto::{Message, Question, RecordType, ResponseCode};
use sentra_resolver::{Forward, ForwardOutcome};
use sentra_store::{QueryDecision, QueryRecord};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Context for one inbound message.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Client address.
    pub client: SocketAddr,

    /// When the message was received.
    pub received_at: Instant,
}

impl QueryContext {
    /// Creates a context stamped now.
    pub fn new(client: SocketAddr) -> Self {
        Self {
            client,
            received_at: Instant::now(),
        }
    }

    /// Elapsed time since receipt.
    pub fn elapsed(&self) -> std::time::Duration {
        self.received_at.elapsed()
    }
}

/// Handles one parsed DNS message.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    /// Produces the response for `query`.
    async fn handle(&self, query: Message, context: QueryContext) -> Message;
}

/// The filtering pipeline: classify, then block or forward.
pub struct FilterHandler {
    classifier: Classifier,
    forwarder: Arc<dyn Forward>,
    log_sink: QueryLogSink,
}

impl FilterHandler {
    /// Creates a handler over the given collaborators.
    pub fn new(
        classifier: Classifier,
        forwarder: Arc<dyn Forward>,
        log_sink: QueryLogSink,
    ) -> Self {
        Self {
            classifier,
            forwarder,
            log_sink,
        }
    }

    fn log(
        &self,
        context: &QueryContext,
        question: &Question,
        decision: QueryDecision,
        threat_type: Option<String>,
    ) {
        self.log_sink.log(QueryRecord {
            timestamp: Utc::now(),
            client_addr: context.client.to_string(),
            domain: question.qname.to_lookup_key().to_string(),
            qtype: question.qtype_name(),
            decision,
            threat_type,
            response_ms: Some(context.elapsed().as_millis() as u64),
        });
    }
}

#[async_trait]
impl QueryHandler for FilterHandler {
    async fn handle(&self, query: Message, context: QueryContext) -> Message {
        metrics().record_query();

        let mut response = Message::response_from(&query);
        response.header_mut().set_authoritative(false);
        response.header_mut().set_recursion_available(true);

        // Questions are processed in order; the first terminal verdict
        // (block, NXDOMAIN, failure) ends the loop. An empty question
        // section falls through to an empty NOERROR reply.
        for question in query.questions() {
            metrics().record_qtype(&question.qtype_name());

            let domain = question.qname.to_lookup_key();
            debug!(domain = %domain, qtype = %question.qtype_name(),
                   client = %context.client, "processing question");

            let verdict = self.classifier.classify(&domain).await;
            if verdict.block {
                let threat_type = verdict
                    .threat_type
                    .unwrap_or_else(|| "unknown".to_string());
                metrics().record_blocked(&threat_type);
                tracing::info!(domain = %domain, threat_type = %threat_type,
                               client = %context.client, "blocked domain");

                self.log(&context, question, QueryDecision::Blocked, Some(threat_type));
                // A blocked response carries no answers, even ones already
                // collected for earlier questions in the same message.
                response.clear_answers();
                response.set_rcode(ResponseCode::NXDomain);
                break;
            }

            match self.forwarder.forward(question).await {
                Ok(ForwardOutcome::Answer(records)) => {
                    metrics().record_allowed();
                    self.log(&context, question, QueryDecision::Allowed, None);
                    response.add_answers(records);
                }
                Ok(ForwardOutcome::NxDomain) => {
                    metrics().record_allowed();
                    self.log(&context, question, QueryDecision::Allowed, None);
                    response.set_rcode(ResponseCode::NXDomain);
                    break;
                }
                Err(e) => {
                    warn!(domain = %domain, error = %e, "forwarding failed");
                    metrics().record_error();
                    self.log(&context, question, QueryDecision::Error, None);
                    response.set_rcode(ResponseCode::ServFail);
                    break;
                }
            }
        }

        metrics().record_response_time(context.elapsed());
        response
    }
}

/// Returns the client's advertised UDP payload size when the query
/// carries an OPT record, else the classic 512-byte limit.
///
/// The OPT record's class field holds the payload size; since OPT rides
/// through this server opaquely, that is the only field we interpret.
pub fn max_udp_response_size(query: &Message) -> usize {
    query
        .additional()
        .iter()
        .find(|r| r.record_type() == Some(RecordType::OPT))
        .map(|r| usize::from(r.rclass().to_u16()).max(512))
        .unwrap_or(512)
}
