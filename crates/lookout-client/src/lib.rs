pub mod api;
pub mod classify;
pub mod config;
pub mod deployment_monitor;
pub mod error;
pub mod message_reconciler;
pub mod push_channel;
pub mod request_ledger;
pub mod timer;
pub mod view;

pub use api::{HttpProjectApi, ProjectApi};
pub use config::SyncConfig;
pub use deployment_monitor::{DeploymentJob, DeploymentMonitor};
pub use error::SyncError;
pub use message_reconciler::{MessageReconciler, RenderedMessage};
pub use push_channel::{ChannelEvent, PushChannel};
pub use request_ledger::{RequestLedger, TrackedRequest};
pub use view::{ProjectView, ProjectViewHandle, SubmitDisposition, SubmitReceipt, ViewSnapshot};
