pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod intent;
pub mod normalizer;
pub mod reactor;
pub mod resolver;
pub mod state;
pub mod store;
pub mod sweeper;
pub mod telemetry;
pub mod time;
