pub mod apm;
pub mod builder;
pub mod config;
pub mod error_shape;
pub mod identity;
pub mod level;
pub mod queue;
pub mod record;
pub mod seq_date;
pub mod serializer;
pub mod sink;
pub mod flusher;
pub mod writer;
pub mod layer;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

pub mod backend;
pub mod env;
pub mod init;
pub mod noop_sink;
