//! Shared application state for the HTTP/WebSocket surface. Grounded on
//! `web/state.rs`'s `AppState`, generalized from a single SSE session map
//! plus one backend server to the full set of controller collaborators.

use std::sync::Arc;
use std::time::Duration;

use stationbus_proto::Source;

use crate::broker_monitor::BrokerMonitor;
use crate::command_sender::CommandSender;
use crate::dispatcher::Dispatcher;
use crate::estop::EstopCoordinator;
use crate::hub::Hub;
use crate::registry::Registry;
use crate::store::Store;
use crate::test_run::TestRunManager;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub estop: Arc<EstopCoordinator>,
    pub dispatcher: Arc<Dispatcher>,
    pub command_sender: Arc<CommandSender>,
    pub broker_monitor: Arc<BrokerMonitor>,
    pub hub: Arc<Hub>,
    pub store: Arc<dyn Store>,
    pub test_runs: Arc<TestRunManager>,
    pub source: Source,
    pub default_command_timeout: Duration,
}
