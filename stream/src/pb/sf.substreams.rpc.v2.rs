#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(int64, tag = "1")]
    pub start_block_num: i64,
    #[prost(string, tag = "2")]
    pub start_cursor: ::prost::alloc::string::String,
    #[prost(uint64, tag = "3")]
    pub stop_block_num: u64,
    /// Only irreversible blocks are sent, no undo signal can happen.
    #[prost(bool, tag = "4")]
    pub final_blocks_only: bool,
    #[prost(bool, tag = "5")]
    pub production_mode: bool,
    #[prost(string, tag = "6")]
    pub output_module: ::prost::alloc::string::String,
    /// Encoded `sf.substreams.v1.Modules`, forwarded as-is from the package.
    #[prost(bytes = "vec", tag = "7")]
    pub modules: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, repeated, tag = "10")]
    pub debug_initial_store_snapshot_for_modules:
        ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(oneof = "response::Message", tags = "1, 3, 4, 5")]
    pub message: ::core::option::Option<response::Message>,
}

pub mod response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        Session(super::SessionInit),
        #[prost(message, tag = "3")]
        BlockScopedData(super::BlockScopedData),
        #[prost(message, tag = "4")]
        BlockUndoSignal(super::BlockUndoSignal),
        #[prost(message, tag = "5")]
        FatalError(super::Error),
    }
}

/// Every block after `last_valid_block` must be considered retracted.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockUndoSignal {
    #[prost(message, optional, tag = "1")]
    pub last_valid_block: ::core::option::Option<super::super::v1::BlockRef>,
    #[prost(string, tag = "2")]
    pub last_valid_cursor: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockScopedData {
    #[prost(message, optional, tag = "1")]
    pub output: ::core::option::Option<MapModuleOutput>,
    #[prost(message, optional, tag = "2")]
    pub clock: ::core::option::Option<super::super::v1::Clock>,
    #[prost(string, tag = "3")]
    pub cursor: ::prost::alloc::string::String,
    #[prost(uint64, tag = "4")]
    pub final_block_height: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionInit {
    #[prost(string, tag = "1")]
    pub trace_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub resolved_start_block: u64,
    #[prost(uint64, tag = "3")]
    pub linear_handoff_block: u64,
    #[prost(uint64, tag = "4")]
    pub max_parallel_workers: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MapModuleOutput {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub map_output: ::core::option::Option<::prost_types::Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Error {
    #[prost(string, tag = "1")]
    pub module: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub logs: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "4")]
    pub logs_truncated: bool,
}

pub mod stream_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;

    #[derive(Debug, Clone)]
    pub struct StreamClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl<T> StreamClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }

        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> StreamClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<http::Request<tonic::body::BoxBody>>>::Error:
                Into<StdError> + std::marker::Send + std::marker::Sync,
        {
            StreamClient::new(InterceptedService::new(inner, interceptor))
        }

        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.send_compressed(encoding);
            self
        }

        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.accept_compressed(encoding);
            self
        }

        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }

        pub async fn blocks(
            &mut self,
            request: impl tonic::IntoRequest<super::Request>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::Response>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e.into()),
                )
            })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/sf.substreams.rpc.v2.Stream/Blocks");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("sf.substreams.rpc.v2.Stream", "Blocks"));
            self.inner.server_streaming(req, path, codec).await
        }
    }
}
