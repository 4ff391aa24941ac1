//! Admin-service client: wire messages and the execution-create call.
//!
//! The scheduler only needs one RPC from the admin surface, so the message
//! structs and the unary client are written out in the shape `tonic` would
//! generate for them. Everything downstream depends on the [`AdminClient`]
//! trait, which tests satisfy with in-process mocks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tonic::codegen::http;
use tonic::transport::{Channel, Endpoint};

/// Request to create one workflow execution for a scheduled instant.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionCreateRequest {
    #[prost(string, tag = "1")]
    pub project: String,
    #[prost(string, tag = "2")]
    pub domain: String,
    /// Deterministic execution name; resubmitting the same (schedule,
    /// instant) pair produces the same name and an AlreadyExists response.
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(message, optional, tag = "4")]
    pub spec: Option<ExecutionSpec>,
    #[prost(map = "string, message", tag = "5")]
    pub inputs: HashMap<String, Literal>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionSpec {
    #[prost(message, optional, tag = "1")]
    pub launch_plan: Option<LaunchPlanIdentifier>,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<ExecutionMetadata>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LaunchPlanIdentifier {
    #[prost(string, tag = "1")]
    pub project: String,
    #[prost(string, tag = "2")]
    pub domain: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub version: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionMetadata {
    #[prost(enumeration = "ExecutionMode", tag = "1")]
    pub mode: i32,
    #[prost(message, optional, tag = "2")]
    pub scheduled_at: Option<::prost_types::Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ExecutionMode {
    Manual = 0,
    Scheduled = 1,
}

/// A typed input value. The scheduler only ever injects datetimes.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Literal {
    #[prost(message, optional, tag = "1")]
    pub datetime: Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionCreateResponse {
    #[prost(message, optional, tag = "1")]
    pub id: Option<ExecutionIdentifier>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionIdentifier {
    #[prost(string, tag = "1")]
    pub project: String,
    #[prost(string, tag = "2")]
    pub domain: String,
    #[prost(string, tag = "3")]
    pub name: String,
}

pub(crate) fn to_proto_timestamp(instant: DateTime<Utc>) -> ::prost_types::Timestamp {
    ::prost_types::Timestamp {
        seconds: instant.timestamp(),
        nanos: instant.timestamp_subsec_nanos() as i32,
    }
}

/// Unary client for the admin service's CreateExecution RPC.
#[derive(Debug, Clone)]
pub struct AdminServiceClient {
    inner: tonic::client::Grpc<Channel>,
}

impl AdminServiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn create_execution(
        &mut self,
        request: impl tonic::IntoRequest<ExecutionCreateRequest>,
    ) -> Result<tonic::Response<ExecutionCreateResponse>, tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;
        let codec = tonic::codec::ProstCodec::default();
        let path =
            http::uri::PathAndQuery::from_static("/metronome.admin.AdminService/CreateExecution");
        self.inner.unary(request.into_request(), path, codec).await
    }
}

/// The one admin capability the scheduler needs.
///
/// `Code::AlreadyExists` on the returned status is the idempotent-duplicate
/// signal: the execution for this (schedule, instant) pair was submitted by
/// an earlier attempt or an earlier process.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn create_execution(
        &self,
        request: ExecutionCreateRequest,
    ) -> Result<ExecutionCreateResponse, tonic::Status>;
}

/// [`AdminClient`] over a shared gRPC channel.
#[derive(Clone)]
pub struct GrpcAdminClient {
    channel: Channel,
}

impl GrpcAdminClient {
    pub async fn connect(endpoint: String) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint)?.connect().await?;
        Ok(Self { channel })
    }
}

#[async_trait]
impl AdminClient for GrpcAdminClient {
    async fn create_execution(
        &self,
        request: ExecutionCreateRequest,
    ) -> Result<ExecutionCreateResponse, tonic::Status> {
        let mut client = AdminServiceClient::new(self.channel.clone());
        let response = client.create_execution(request).await?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use prost::Message;

    #[test]
    fn request_encoding_round_trips() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let mut inputs = HashMap::new();
        inputs.insert(
            "kickoff_time".to_string(),
            Literal {
                datetime: Some(to_proto_timestamp(instant)),
            },
        );

        let request = ExecutionCreateRequest {
            project: "flytesnacks".to_string(),
            domain: "development".to_string(),
            name: "fdeadbeefdeadbeefdea".to_string(),
            spec: Some(ExecutionSpec {
                launch_plan: Some(LaunchPlanIdentifier {
                    project: "flytesnacks".to_string(),
                    domain: "development".to_string(),
                    name: "hourly_report".to_string(),
                    version: "v1".to_string(),
                }),
                metadata: Some(ExecutionMetadata {
                    mode: ExecutionMode::Scheduled as i32,
                    scheduled_at: Some(to_proto_timestamp(instant)),
                }),
            }),
            inputs,
        };

        let decoded = ExecutionCreateRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn proto_timestamp_preserves_seconds() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let ts = to_proto_timestamp(instant);
        assert_eq!(ts.seconds, instant.timestamp());
        assert_eq!(ts.nanos, 0);
    }
}
