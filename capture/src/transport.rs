use super::{packet, ResultVector};

/// A best-effort sink for encoded packets.
pub trait Transport {
    /// Deliver a packet to the connected peer.
    ///
    /// # Returns
    /// True if the packet was handed off, false if no peer is connected or sending failed.
    /// Packets are never retried.
    fn notify(&mut self, packet: &[u8]) -> bool;

    /// Encode and deliver a detection result.
    fn publish(&mut self, result: &ResultVector) -> bool {
        self.notify(&packet::Data::from(result).encode())
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn notify(&mut self, packet: &[u8]) -> bool {
        (**self).notify(packet)
    }
}
