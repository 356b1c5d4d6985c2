mod handlers;
mod server;
mod state;

pub use server::ParameterServer;
pub use state::ServerState;
