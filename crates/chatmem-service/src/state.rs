use chatmem_engine::MemoryEngine;
use chatmem_session::SessionController;
use lapin::Channel;

/// Shared across every request and held for the life of the process. The
/// `lapin::Channel` is multiplexed across concurrent requests — one AMQP
/// channel per worker/binary, not per request, per §5's shared-resources
/// note.
pub struct AppState {
    pub engine: MemoryEngine,
    pub session: SessionController,
    pub channel: Channel,
}
