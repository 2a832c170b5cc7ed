///////////////////////////////////////////////////////////////////////////////
// Components /////////////////////////////////////////////////////////////////

/// One member of a replica set configuration.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Member {
    /// The member ID, unique within a configuration.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    /// The `host:port` of this member.
    #[prost(string, tag = "2")]
    pub host: ::prost::alloc::string::String,
    /// The vote weight of this member, 0 or 1.
    #[prost(uint32, tag = "3")]
    pub votes: u32,
    /// The election priority of this member.
    #[prost(double, tag = "4")]
    pub priority: f64,
    /// Member tags, the controller node ID is stored under the `node-id` tag.
    #[prost(map = "string, string", tag = "5")]
    pub tags:
        ::std::collections::HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
}
/// A full replica set configuration.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicaSetConfig {
    /// The configuration version.
    #[prost(uint64, tag = "1")]
    pub version: u64,
    /// All members of the configuration.
    #[prost(message, repeated, tag = "2")]
    pub members: ::prost::alloc::vec::Vec<Member>,
}
///////////////////////////////////////////////////////////////////////////////
// GetStatus //////////////////////////////////////////////////////////////////

/// A request for the replica set status.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusRequest {}
/// The replica set status.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicaSetStatus {
    /// The current configuration.
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<ReplicaSetConfig>,
    /// True if a primary is currently known.
    #[prost(bool, tag = "2")]
    pub has_primary: bool,
    /// The member ID of the current primary, valid when `has_primary` is set.
    #[prost(uint32, tag = "3")]
    pub primary_id: u32,
}
///////////////////////////////////////////////////////////////////////////////
// SubmitConfig ///////////////////////////////////////////////////////////////

/// The response to a configuration submission.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitConfigResponse {}
#[doc = r" Generated client implementations."]
pub mod replica_set_admin_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;
    #[doc = " The administrative interface of the consensus store's replica set."]
    #[derive(Debug, Clone)]
    pub struct ReplicaSetAdminClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl ReplicaSetAdminClient<tonic::transport::Channel> {
        #[doc = r" Attempt to create a new client by connecting to a given endpoint."]
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: std::convert::TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> ReplicaSetAdminClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::ResponseBody: Body + Send + 'static,
        T::Error: Into<StdError>,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> ReplicaSetAdminClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<http::Request<tonic::body::BoxBody>>>::Error:
                Into<StdError> + Send + Sync,
        {
            ReplicaSetAdminClient::new(InterceptedService::new(inner, interceptor))
        }
        #[doc = r" Compress requests with `gzip`."]
        #[doc = r""]
        #[doc = r" This requires the server to support it otherwise it might respond with an"]
        #[doc = r" error."]
        pub fn send_gzip(mut self) -> Self {
            self.inner = self.inner.send_gzip();
            self
        }
        #[doc = r" Enable decompressing responses with `gzip`."]
        pub fn accept_gzip(mut self) -> Self {
            self.inner = self.inner.accept_gzip();
            self
        }
        #[doc = " Fetch the store's current replica set configuration and primary."]
        pub async fn get_status(
            &mut self,
            request: impl tonic::IntoRequest<super::GetStatusRequest>,
        ) -> Result<tonic::Response<super::ReplicaSetStatus>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replicaset.ReplicaSetAdmin/GetStatus");
            self.inner.unary(request.into_request(), path, codec).await
        }
        #[doc = " Submit a new replica set configuration."]
        pub async fn submit_config(
            &mut self,
            request: impl tonic::IntoRequest<super::ReplicaSetConfig>,
        ) -> Result<tonic::Response<super::SubmitConfigResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replicaset.ReplicaSetAdmin/SubmitConfig");
            self.inner.unary(request.into_request(), path, codec).await
        }
    }
}
