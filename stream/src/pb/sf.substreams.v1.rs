#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Clock {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub number: u64,
    #[prost(message, optional, tag = "3")]
    pub timestamp: ::core::option::Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockRef {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub number: u64,
}

/// A `.spkg` package. `modules` holds the encoded `sf.substreams.v1.Modules`
/// message, decode it with [`Modules`] to inspect it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Package {
    #[prost(uint64, tag = "5")]
    pub version: u64,
    #[prost(bytes = "vec", tag = "6")]
    pub modules: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "9")]
    pub network: ::prost::alloc::string::String,
}

/// Read-only view over `sf.substreams.v1.Modules`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Modules {
    #[prost(message, repeated, tag = "1")]
    pub modules: ::prost::alloc::vec::Vec<Module>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Module {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "7")]
    pub output: ::core::option::Option<module::Output>,
    #[prost(uint64, tag = "8")]
    pub initial_block: u64,
}

pub mod module {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Output {
        #[prost(string, tag = "1")]
        pub r#type: ::prost::alloc::string::String,
    }
}
