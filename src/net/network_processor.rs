//! Task to process network hardware.
//!
//! # Design
//! The network processor regularly processes incoming data over ethernet, handles the ethernet
//! PHY state and resets the network stack when the link goes down.
use super::UpdateState;
use crate::hardware::{EthernetPhy, NetworkStack};

/// Processor for managing network hardware.
pub struct NetworkProcessor {
    stack: NetworkStack,
    phy: EthernetPhy,
    network_was_reset: bool,
}

impl NetworkProcessor {
    /// Construct a new network processor.
    ///
    /// # Args
    /// * `stack` - The network stack.
    /// * `phy` - The ethernet PHY used for the network.
    pub fn new(stack: NetworkStack, phy: EthernetPhy) -> Self {
        Self {
            stack,
            phy,
            network_was_reset: false,
        }
    }

    pub fn stack_mut(&mut self) -> &mut NetworkStack {
        &mut self.stack
    }

    /// Handle ethernet link connection status.
    ///
    /// # Note
    /// Communicating with the PHY takes non-trivial amounts of time. Call about once per second.
    ///
    /// # Returns
    /// True if the link is up.
    pub fn handle_link(&mut self) -> bool {
        let link_up = self.phy.poll_link();
        match (link_up, self.network_was_reset) {
            (true, true) => {
                log::warn!("Network link UP");
                self.network_was_reset = false;
            }
            // Reset only once per link loss to avoid excessive DHCP requests.
            (false, false) => {
                log::warn!("Network link DOWN");
                self.network_was_reset = true;
                self.stack.handle_link_reset();
            }
            _ => {}
        };
        link_up
    }

    /// Process and update the state of the network.
    ///
    /// # Note
    /// Call regularly before other network users to update the state of all sockets.
    pub fn update(&mut self) -> UpdateState {
        match self.stack.poll() {
            Ok(true) => UpdateState::Updated,
            Ok(false) => UpdateState::NoChange,
            Err(_) => UpdateState::Updated,
        }
    }
}
