//! The Hacxgent agent runtime.
//!
//! [`AgentLoop`] drives the conversation: it streams responses from a
//! backend through the [`StreamAggregator`], dispatches tool calls through
//! the [`ToolExecutor`] (permission policy and approvals included), compacts
//! old history with the [`Compactor`], and enforces run [`Budget`]s.
//! Committed messages are persisted through a session log such as
//! [`JsonlSessionLog`].

pub mod aggregator;
pub mod approval;
pub mod budget;
pub mod builder;
pub mod compaction;
pub mod executor;
pub mod loop_runner;
pub mod session_log;
pub mod stream_event;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aggregator::{Aggregated, StreamAggregator};
pub use approval::{ApprovalBroker, ApprovalDecision};
pub use budget::{Budget, Limits};
pub use builder::{build_registry, reload_mcp, start_mcp};
pub use compaction::{CompactionReport, CompactionSettings, Compactor};
pub use executor::{PermissionPolicy, ToolExecutor};
pub use loop_runner::{AgentLoop, LoopHandle};
pub use session_log::JsonlSessionLog;
pub use stream_event::{AgentEvent, EventSink};
