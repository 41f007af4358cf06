//! Backend target abstraction.

use std::sync::Arc;

use crate::upstream::transport::Transport;

/// One backend address paired with the transport that reaches it.
#[derive(Debug)]
pub struct Target {
    addr: String,
    transport: Arc<Transport>,
}

impl Target {
    pub fn new(addr: String, transport: Arc<Transport>) -> Self {
        Self { addr, transport }
    }

    /// Address as configured: `host:port`, or a socket path for `unix`.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// URI authority used for requests to this target.
    pub fn authority(&self) -> &str {
        if self.transport.is_unix() {
            "localhost"
        } else {
            &self.addr
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}
