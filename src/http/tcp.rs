//! The listener backed by the embassy-net TCP stack.

use embassy_net::Stack;
use embassy_net::tcp::{AcceptError, TcpSocket};
use embedded_io_async::Write as _;

use super::server::{Connection, Listener, READ_TIMEOUT};
use crate::{Error, Result};

const BUFFER_LEN: usize = 1024;

/// Accepts one connection at a time on a fixed port, reusing its socket buffers.
pub struct TcpListener {
    stack: Stack<'static>,
    port: u16,
    rx_buffer: [u8; BUFFER_LEN],
    tx_buffer: [u8; BUFFER_LEN],
}

impl TcpListener {
    #[must_use]
    pub const fn new(stack: Stack<'static>, port: u16) -> Self {
        Self {
            stack,
            port,
            rx_buffer: [0; BUFFER_LEN],
            tx_buffer: [0; BUFFER_LEN],
        }
    }
}

impl Listener for TcpListener {
    type Connection<'c> = TcpSocket<'c>;

    async fn accept(&mut self) -> Result<Self::Connection<'_>> {
        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        socket.set_timeout(Some(READ_TIMEOUT));
        match socket.accept(self.port).await {
            Ok(()) => Ok(socket),
            Err(AcceptError::ConnectionReset) => Err(Error::Transport),
            Err(AcceptError::InvalidState | AcceptError::InvalidPort) => Err(Error::FatalTransport),
        }
    }
}

impl Connection for TcpSocket<'_> {
    async fn shutdown(&mut self) {
        let _ = self.flush().await;
        self.close();
        let _ = self.flush().await;
    }
}
