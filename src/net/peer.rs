//! Result transport peer link
//!
//! # Design
//! A single UDP socket is bound to the configured port. A peer connects by sending an
//! identification request, a bare [Command::About] header. The device answers with its
//! identification packet and from then on sends detection results to the address the request
//! came from. A later request from another address takes over the link. The link is dropped when
//! the ethernet link goes down.
//!
//! Delivery is best-effort: results are sent once and never retried.
use capture::packet::{self, Command, Header};
use core::net::SocketAddr;
use smoltcp_nal::embedded_nal::{nb, UdpFullStack};

/// The largest inbound frame that is inspected.
const MAX_FRAME: usize = 64;

pub struct PeerLink<N: UdpFullStack> {
    socket: Option<N::UdpSocket>,
    port: u16,
    peer: Option<SocketAddr>,
    about: packet::About,
}

impl<N: UdpFullStack> PeerLink<N> {
    /// Construct the link.
    ///
    /// # Args
    /// * `port` - The local UDP port to listen on.
    /// * `about` - The identification reported to peers.
    pub fn new(port: u16, about: packet::About) -> Self {
        Self {
            socket: None,
            port,
            peer: None,
            about,
        }
    }

    /// The address of the connected peer.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn open(&mut self, stack: &mut N) -> Option<&mut N::UdpSocket> {
        if self.socket.is_none() {
            let mut socket = stack.socket().ok()?;
            if let Err(e) = stack.bind(&mut socket, self.port) {
                log::warn!("Failed to bind UDP port {}: {e:?}", self.port);
                stack.close(socket).ok();
                return None;
            }
            log::info!("Listening on UDP port {}", self.port);
            self.socket = Some(socket);
        }
        self.socket.as_mut()
    }

    /// Handle inbound requests.
    ///
    /// # Note
    /// Must be called regularly after the network stack has been polled.
    pub fn process(&mut self, stack: &mut N) {
        let about = self.about.encode();
        let Some(socket) = self.open(stack) else {
            return;
        };

        let mut frame = [0u8; MAX_FRAME];
        let mut connected = None;
        loop {
            let (len, remote) = match stack.receive(socket, &mut frame) {
                Ok(received) => received,
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    log::warn!("UDP receive error: {e:?}");
                    break;
                }
            };

            match Header::parse(&frame[..len.min(MAX_FRAME)]) {
                Err(e) => log::warn!("Rejected frame from {remote}: {e}"),
                Ok(Header {
                    command: Command::About,
                    ..
                }) => match stack.send_to(socket, remote, &about) {
                    Ok(()) => connected = Some(remote),
                    Err(e) => log::warn!("Failed to answer {remote}: {e:?}"),
                },
                Ok(header) => {
                    log::warn!("Ignoring {:?} from {remote}", header.command)
                }
            }
        }

        if let Some(remote) = connected {
            if self.peer != Some(remote) {
                log::info!("Peer connected: {remote}");
            }
            self.peer = Some(remote);
        }
    }

    /// Send a packet to the connected peer.
    ///
    /// # Returns
    /// True if the packet was handed to the stack.
    pub fn notify(&mut self, stack: &mut N, packet: &[u8]) -> bool {
        let (Some(socket), Some(peer)) = (self.socket.as_mut(), self.peer) else {
            return false;
        };

        match stack.send_to(socket, peer, packet) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to send to {peer}: {e:?}");
                false
            }
        }
    }

    /// Drop the peer and the socket.
    pub fn disconnect(&mut self, stack: &mut N) {
        if let Some(peer) = self.peer.take() {
            log::info!("Peer disconnected: {peer}");
        }
        if let Some(socket) = self.socket.take() {
            stack.close(socket).ok();
        }
    }
}
