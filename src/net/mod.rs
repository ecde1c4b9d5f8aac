//! Network management
//!
//! # Design
//! The network carries the result transport: detection results are sent as UDP datagrams to a
//! peer that identified itself with an identification request. All network users share a single
//! network stack owned by the [NetworkProcessor].
pub mod network_processor;
pub mod peer;

use capture::packet;
use network_processor::NetworkProcessor;
use peer::PeerLink;

use crate::hardware::{EthernetPhy, NetworkStack};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UpdateState {
    NoChange,
    Updated,
}

/// The network users of the capture firmware.
pub struct NetworkUsers {
    pub processor: NetworkProcessor,
    link: PeerLink<NetworkStack>,
    link_up: bool,
}

impl NetworkUsers {
    /// Construct the network users.
    ///
    /// # Args
    /// * `stack` - The network stack.
    /// * `phy` - The ethernet PHY connecting the network.
    /// * `port` - The UDP port of the result transport.
    /// * `about` - The identification reported to peers.
    pub fn new(
        stack: NetworkStack,
        phy: EthernetPhy,
        port: u16,
        about: packet::About,
    ) -> Self {
        Self {
            processor: NetworkProcessor::new(stack, phy),
            link: PeerLink::new(port, about),
            link_up: false,
        }
    }

    /// Update and process all network users.
    pub fn update(&mut self) -> UpdateState {
        let state = self.processor.update();
        self.link.process(self.processor.stack_mut());
        state
    }

    /// Handle the ethernet link state and drop the peer on link loss.
    pub fn handle_link(&mut self) {
        let link_up = self.processor.handle_link();
        if self.link_up && !link_up {
            self.link.disconnect(self.processor.stack_mut());
        }
        self.link_up = link_up;
    }

    pub fn connected(&self) -> bool {
        self.link.peer().is_some()
    }
}

impl capture::Transport for NetworkUsers {
    fn notify(&mut self, packet: &[u8]) -> bool {
        self.link.notify(self.processor.stack_mut(), packet)
    }
}
