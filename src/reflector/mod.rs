//! Reflector-side networking.
//!
//! [`ReflectorClient`] owns the UDP socket to one reflector and drives the
//! CONN/ACKN/PING/PONG/DISC handshake; [`DirectoryStore`] loads the
//! reflector host file and answers designator/module lookups.

mod client;
mod directory;

pub use client::{ReflectorClient, ReflectorEvent, EVENT_CAPACITY, PACKET_CAPACITY};
pub use directory::{DirectoryLookup, DirectoryStore, ReflectorInfo};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// How sessions obtain reflector clients. Injected so tests can point every
/// join at a stand-in reflector.
#[async_trait]
pub trait ReflectorFactory: Send + Sync {
    async fn connect(&self, addr: &str, callsign: &str, module: u8)
        -> Result<Arc<ReflectorClient>>;
}

/// Production factory: real UDP connect plus designator lookup from the
/// directory.
pub struct DirectoryReflectorFactory {
    directory: Arc<dyn DirectoryLookup>,
}

impl DirectoryReflectorFactory {
    pub fn new(directory: Arc<dyn DirectoryLookup>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl ReflectorFactory for DirectoryReflectorFactory {
    async fn connect(
        &self,
        addr: &str,
        callsign: &str,
        module: u8,
    ) -> Result<Arc<ReflectorClient>> {
        let client = ReflectorClient::connect(addr, callsign, module).await?;
        if let Some(designator) = self.directory.lookup_designator(addr) {
            client.set_designator(&designator);
        }
        Ok(client)
    }
}
