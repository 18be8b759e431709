pub mod cli;
pub mod client;
pub mod config;
pub mod enrichment;
pub mod entities;
pub mod error;
pub mod logging;
pub mod materializer;
pub mod slug;
pub mod storage;
pub mod utils;
