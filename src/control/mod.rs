//! Local control plane: a line-delimited JSON request/response channel over
//! Unix domain sockets, used to query or mute the engine without a UI.

mod protocol;

#[cfg(unix)]
mod client;
#[cfg(unix)]
mod server;

pub use protocol::{Command, ControlRequest, ControlResponse};

#[cfg(unix)]
pub use client::{send_command, send_request, send_to, ClientError};
#[cfg(unix)]
pub use server::{
    machine_socket_path, user_socket_path, ControlHandler, ControlServer, EndpointScope,
};
