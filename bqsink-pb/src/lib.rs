//! Protobuf objects and the gRPC client for the BigQuery Storage Write API.
//!
//! Only the subset of `google.cloud.bigquery.storage.v1` needed by the sink is included. The
//! code under `generated/` started as `prost-build`/`tonic-build` output and was cut down by hand
//! to those messages and RPCs, so regenerating it brings back the full API.

pub mod google {
    /// `google.rpc` types shared by Google APIs.
    pub mod rpc {
        include!("generated/google.rpc.rs");
    }

    pub mod cloud {
        pub mod bigquery {
            pub mod storage {
                /// Storage Write API v1 objects and the `BigQueryWrite` client.
                pub mod v1 {
                    include!("generated/google.cloud.bigquery.storage.v1.rs");
                }
            }
        }
    }
}

pub use google::cloud::bigquery::storage::v1 as storage;
pub use google::rpc;
