//! CLI command handlers. Each command is in its own file.

mod dump;
mod member;
mod ping;
mod quota;
mod queues;
mod segment_down;
mod segments;
mod serve;

pub use dump::run_dump;
pub use member::run_member;
pub use ping::run_ping;
pub use quota::run_quota_control;
pub use queues::run_queues;
pub use segment_down::run_segment_down;
pub use segments::{run_history, run_segments};
pub use serve::run_serve;
