pub mod api;
pub mod assets;
pub mod server;

use crate::app::controls::Command;
use crate::app::state::SessionState;
use crossbeam::channel::Sender;
use std::sync::Arc;
use std::time::Duration;

/// State handed to every dashboard handler
#[derive(Clone)]
pub struct DashboardState {
    pub session: Arc<SessionState>,
    pub commands: Sender<Command>,
    /// Interval between SSE stats events
    pub stream_period: Duration,
}
