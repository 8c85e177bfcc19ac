//! Async runtime for locally hosted model instances.
//!
//! [`manager::InstanceManager`] is the entry point: it deploys models
//! through a [`provider::BackendProvider`], supervises model-server
//! subprocesses, and routes inference calls to the
//! [`backend::InferenceBackend`] behind each RUNNING instance.

pub mod backend;
pub mod blocking;
pub mod config;
pub mod events;
pub mod manager;
pub mod openai;
pub mod process;
pub mod provider;
pub mod registry;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use backend::{BackendError, GenerationParams, InferenceBackend, TextStream};
pub use config::{ManagerConfig, VllmConfig};
pub use events::InstanceEvent;
pub use manager::InstanceManager;
pub use provider::{BackendProvider, InProcessProvider, Launch, LaunchTarget, VllmProvider};
