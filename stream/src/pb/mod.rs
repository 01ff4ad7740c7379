//! Protobuf types for the Substreams RPC.
//!
//! This is the subset of `sf.substreams.v1` and `sf.substreams.rpc.v2` the sink
//! needs. Module graphs are carried as raw bytes: the server hashes modules, so
//! the package content has to reach it unchanged.

pub mod sf {
    pub mod substreams {
        pub mod v1 {
            include!("sf.substreams.v1.rs");
        }

        pub mod rpc {
            pub mod v2 {
                include!("sf.substreams.rpc.v2.rs");
            }
        }
    }
}
