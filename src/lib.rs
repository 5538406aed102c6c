pub mod clock;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod gateway;
pub mod llm;
pub mod pending;
pub mod prompt_classifier;
pub mod schema;
pub mod server;
pub mod statement;
pub mod translator;
pub mod value;
pub mod warehouse;

pub use gateway::{GatewayRequest, GatewayResponse, QueryGateway};
