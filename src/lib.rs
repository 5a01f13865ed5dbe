pub mod client;
pub mod config;
pub mod gateway_impl;
pub mod gateway_service;
pub mod metadata_impl;
pub mod metadata_service;
pub mod storage_impl;
pub mod storage_service;
pub mod util;

pub mod proto {
    pub mod bigfs {
        tonic::include_proto!("bigfs");
    }
}
