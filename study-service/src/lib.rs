//! Study Service Library
//!
//! Background core of the study assistant: dispatches requests from the
//! browser extension, loads feature modules on first use and caches
//! expensive generation results.

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod models;
pub mod modules;
pub mod notify;
pub mod registry;
pub mod reminders;
pub mod request;
pub mod server;
pub mod storage;
pub mod study_store;

pub use cache::ResultCache;
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use envelope::ResponseEnvelope;
pub use registry::{ModuleGroup, ModuleRegistry};
pub use request::Request;
pub use server::StudyServer;
