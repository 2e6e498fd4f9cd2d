//! gRPC implementation of [`FrontendTransport`]
//!
//! Calls go through `tonic::client::Grpc` with a prost codec, the same path
//! generated stubs take. The channel is built with `connect_lazy` on the first
//! call, so constructing a `GrpcFrontend` never touches the network.

use super::proto;
use super::{AssignmentStream, FrontendTransport};
use crate::config::{FrontendSettings, TransportSecurity};
use crate::error::{TransportError, TransportKind, TransportResult};
use crate::types::{Assignment, SearchCriteria, SearchValue, Ticket};
use crate::utils::timestamp_from_proto;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_stream::StreamExt;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Request;
use tracing::debug;

/// Open Match frontend client over gRPC
pub struct GrpcFrontend {
    address: String,
    endpoint: Endpoint,
    channel: OnceCell<Channel>,
    call_timeout: Duration,
}

impl GrpcFrontend {
    /// Build the endpoint. Fails only on a malformed address or TLS material.
    pub fn new(settings: &FrontendSettings) -> TransportResult<Self> {
        let scheme = match settings.security {
            TransportSecurity::Plaintext => "http",
            TransportSecurity::Tls { .. } => "https",
        };

        let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, settings.address))
            .map_err(|e| {
                TransportError::new(
                    TransportKind::InvalidArgument,
                    format!("invalid frontend address {}: {}", settings.address, e),
                )
            })?
            .connect_timeout(settings.connect_timeout());

        if let TransportSecurity::Tls {
            ca_certificate,
            domain_name,
        } = &settings.security
        {
            let mut tls = ClientTlsConfig::new();
            match ca_certificate {
                Some(path) => {
                    let pem = std::fs::read(path).map_err(|e| {
                        TransportError::new(
                            TransportKind::InvalidArgument,
                            format!("cannot read CA certificate {}: {}", path.display(), e),
                        )
                    })?;
                    tls = tls.ca_certificate(Certificate::from_pem(pem));
                }
                None => tls = tls.with_webpki_roots(),
            }
            if let Some(domain) = domain_name {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint.tls_config(tls).map_err(|e| {
                TransportError::new(
                    TransportKind::InvalidArgument,
                    format!("invalid TLS configuration: {}", e),
                )
            })?;
        }

        Ok(Self {
            address: settings.address.clone(),
            endpoint,
            channel: OnceCell::new(),
            call_timeout: settings.call_timeout(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn client(&self) -> TransportResult<Grpc<Channel>> {
        let channel = self
            .channel
            .get_or_init(|| async {
                debug!("Opening lazy channel to {}", self.address);
                self.endpoint.connect_lazy()
            })
            .await
            .clone();

        let mut grpc = Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| TransportError::unavailable(format!("service was not ready: {}", e)))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, message: Req) -> TransportResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.client().await?;
        let mut request = Request::new(message);
        request.set_timeout(self.call_timeout);

        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl FrontendTransport for GrpcFrontend {
    async fn create_ticket(&self, criteria: &SearchCriteria) -> TransportResult<Ticket> {
        let request = proto::CreateTicketRequest {
            ticket: Some(proto::Ticket {
                search_fields: Some(criteria.into()),
                ..Default::default()
            }),
        };
        let ticket: proto::Ticket = self.unary(proto::CREATE_TICKET, request).await?;
        Ok(ticket.into())
    }

    async fn get_ticket(&self, ticket_id: &str) -> TransportResult<Ticket> {
        let request = proto::GetTicketRequest {
            ticket_id: ticket_id.to_string(),
        };
        let ticket: proto::Ticket = self.unary(proto::GET_TICKET, request).await?;
        Ok(ticket.into())
    }

    async fn delete_ticket(&self, ticket_id: &str) -> TransportResult<()> {
        let request = proto::DeleteTicketRequest {
            ticket_id: ticket_id.to_string(),
        };
        self.unary::<_, ()>(proto::DELETE_TICKET, request).await
    }

    async fn watch_assignments(&self, ticket_id: &str) -> TransportResult<AssignmentStream> {
        let mut grpc = self.client().await?;
        let request = Request::new(proto::WatchAssignmentsRequest {
            ticket_id: ticket_id.to_string(),
        });

        let codec: ProstCodec<proto::WatchAssignmentsRequest, proto::WatchAssignmentsResponse> =
            ProstCodec::default();
        let response = grpc
            .server_streaming(request, PathAndQuery::from_static(proto::WATCH_ASSIGNMENTS), codec)
            .await?;

        let stream = response.into_inner().map(|item| {
            item.map(|message| {
                message
                    .assignment
                    .map(Assignment::from)
                    .filter(|assignment| !assignment.is_empty())
            })
            .map_err(TransportError::from)
        });
        Ok(Box::pin(stream))
    }
}

impl From<&SearchCriteria> for proto::SearchFields {
    fn from(criteria: &SearchCriteria) -> Self {
        let mut fields = proto::SearchFields {
            tags: criteria.tags.clone(),
            ..Default::default()
        };
        for (key, value) in &criteria.attributes {
            match value {
                SearchValue::Number(n) => {
                    fields.double_args.insert(key.clone(), *n);
                }
                SearchValue::Text(s) => {
                    fields.string_args.insert(key.clone(), s.clone());
                }
            }
        }
        fields
    }
}

impl From<proto::SearchFields> for SearchCriteria {
    fn from(fields: proto::SearchFields) -> Self {
        let mut criteria = SearchCriteria {
            tags: fields.tags,
            ..Default::default()
        };
        for (key, n) in fields.double_args {
            criteria.attributes.insert(key, SearchValue::Number(n));
        }
        for (key, s) in fields.string_args {
            criteria.attributes.insert(key, SearchValue::Text(s));
        }
        criteria
    }
}

impl From<proto::Assignment> for Assignment {
    fn from(assignment: proto::Assignment) -> Self {
        Self {
            connection: assignment.connection,
            extensions: assignment
                .extensions
                .into_iter()
                .map(|(key, any)| (key, any.value))
                .collect(),
        }
    }
}

impl From<proto::Ticket> for Ticket {
    fn from(ticket: proto::Ticket) -> Self {
        let created_at = timestamp_from_proto(ticket.create_time.as_ref());
        let criteria = ticket.search_fields.map(SearchCriteria::from).unwrap_or_default();
        let mut converted = Ticket::new(ticket.id, criteria, created_at);
        if let Some(assignment) = ticket.assignment.map(Assignment::from) {
            if !assignment.is_empty() {
                // Freshly converted tickets carry no prior assignment.
                let _ = converted.assign(assignment);
            }
        }
        converted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_criteria_to_search_fields() {
        let criteria = SearchCriteria::new()
            .tag("mode.session")
            .text("region", "asia-northeast1")
            .number("skill", 1.5);
        let fields = proto::SearchFields::from(&criteria);

        assert_eq!(fields.tags, vec!["mode.session".to_string()]);
        assert_eq!(fields.double_args.get("skill"), Some(&1.5));
        assert_eq!(
            fields.string_args.get("region").map(String::as_str),
            Some("asia-northeast1")
        );
        assert_eq!(SearchCriteria::from(fields), criteria);
    }

    #[test]
    fn test_ticket_decodes_assignment_and_extensions() {
        let mut assignment = proto::Assignment {
            connection: "10.0.0.5:7777".to_string(),
            ..Default::default()
        };
        assignment.extensions.insert(
            "session".to_string(),
            prost_types::Any {
                type_url: "type.googleapis.com/google.protobuf.BytesValue".to_string(),
                value: vec![1, 2, 3],
            },
        );
        let wire = proto::Ticket {
            id: "t-1".to_string(),
            assignment: Some(assignment),
            create_time: Some(prost_types::Timestamp {
                seconds: 1_700_000_000,
                nanos: 0,
            }),
            ..Default::default()
        }
        .encode_to_vec();

        let ticket = Ticket::from(proto::Ticket::decode(wire.as_slice()).unwrap());
        assert_eq!(ticket.id, "t-1");
        assert_eq!(ticket.created_at.timestamp(), 1_700_000_000);
        let assignment = ticket.assignment().unwrap();
        assert_eq!(assignment.connection, "10.0.0.5:7777");
        assert_eq!(assignment.extensions.get("session"), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_empty_assignment_is_not_recorded() {
        let ticket = Ticket::from(proto::Ticket {
            id: "t-2".to_string(),
            assignment: Some(proto::Assignment::default()),
            ..Default::default()
        });
        assert!(ticket.assignment().is_none());
    }

    #[test]
    fn test_invalid_address_rejected() {
        let settings = FrontendSettings {
            address: "not a uri".to_string(),
            ..Default::default()
        };
        let err = GrpcFrontend::new(&settings).err().unwrap();
        assert_eq!(err.kind, TransportKind::InvalidArgument);
    }

    #[test]
    fn test_construction_is_lazy() {
        let settings = FrontendSettings {
            address: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let frontend = GrpcFrontend::new(&settings).unwrap();
        assert_eq!(frontend.address(), "127.0.0.1:1");
        assert!(frontend.channel.get().is_none());
    }
}
