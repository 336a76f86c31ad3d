//! Bus transport contract and backends.
//!
//! Everything the node needs from the CAN transport is captured by
//! [`BusTransport`]: a bounded-wait receive (where "nothing arrived" is a
//! valid outcome), a single-frame send that distinguishes transmit-queue
//! backpressure from other faults, and a close. The handle is not safe for
//! uncoordinated concurrent use; callers serialize access through one mutex
//! (see [`crate::node`]).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// CAN 2.0 payload limit.
pub const MAX_FRAME_DATA: usize = 8;
/// Largest standard (11-bit) identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// The transport's outbound queue is full; the send may succeed shortly.
    #[error("transmit queue backlogged")]
    Backlogged,
    #[error("transport fault: {0}")]
    Transport(String),
    #[error("transport closed")]
    Closed,
}

/// A standard-identifier data frame.
///
/// Validated at construction: identifier fits 11 bits, payload fits CAN 2.0.
/// Extended identifiers are not part of this node's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    id: u32,
    data: Vec<u8>,
}

impl BusFrame {
    pub fn new(id: u32, data: Vec<u8>) -> Result<Self, BusError> {
        if id > MAX_STANDARD_ID {
            return Err(BusError::InvalidFrame("standard id exceeds 0x7FF"));
        }
        if data.len() > MAX_FRAME_DATA {
            return Err(BusError::InvalidFrame("payload exceeds 8 bytes"));
        }
        Ok(Self { id, data })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Receive filter: a frame passes when `frame_id & mask == id & mask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFilter {
    pub id: u32,
    pub mask: u32,
}

impl BusFilter {
    /// Exact-match filter for one standard identifier.
    pub fn exact(id: u32) -> Self {
        Self {
            id,
            mask: MAX_STANDARD_ID,
        }
    }

    pub fn matches(&self, frame_id: u32) -> bool {
        (frame_id & self.mask) == (self.id & self.mask)
    }
}

/// Serialized CAN transport handle.
#[async_trait]
pub trait BusTransport: Send {
    /// Wait up to `max_wait` for one inbound frame. `Ok(None)` means nothing
    /// arrived in time and is not an error.
    async fn recv(&mut self, max_wait: Duration) -> Result<Option<BusFrame>, BusError>;

    /// Attempt one transmission. [`BusError::Backlogged`] reports a full
    /// outbound queue; everything else is a transport fault.
    async fn send(&mut self, frame: &BusFrame) -> Result<(), BusError>;

    async fn close(&mut self) -> Result<(), BusError>;
}

/// Scripted send failure for [`MockBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFault {
    Backlogged,
    Fault,
}

#[derive(Debug, Default)]
struct MockBusState {
    rx_queue: VecDeque<BusFrame>,
    sent: Vec<BusFrame>,
    send_attempts: u32,
    scripted_faults: VecDeque<SendFault>,
    closed: bool,
}

/// In-memory transport for tests and simulation-mode runs.
///
/// Injected frames pass through the same receive filters a real interface
/// would apply, so tests exercise the node's actual inbound surface.
#[derive(Debug)]
pub struct MockBus {
    filters: Vec<BusFilter>,
    state: Arc<Mutex<MockBusState>>,
}

impl MockBus {
    pub fn new(filters: Vec<BusFilter>) -> Self {
        Self {
            filters,
            state: Arc::new(Mutex::new(MockBusState::default())),
        }
    }

    /// Shared handle for injecting traffic and inspecting sends while the
    /// transport itself is owned by the node.
    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            filters: self.filters.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

/// Test-side view of a [`MockBus`].
#[derive(Debug, Clone)]
pub struct MockBusHandle {
    filters: Vec<BusFilter>,
    state: Arc<Mutex<MockBusState>>,
}

impl MockBusHandle {
    /// Queue an inbound frame. Frames rejected by the receive filters are
    /// dropped, as the kernel would drop them before the node ever saw them.
    pub fn inject(&self, frame: BusFrame) {
        if !self.filters.is_empty() && !self.filters.iter().any(|f| f.matches(frame.id())) {
            return;
        }
        self.state.lock().unwrap().rx_queue.push_back(frame);
    }

    /// Script a failure for the next send attempt (FIFO across calls).
    pub fn fail_next_send(&self, fault: SendFault) {
        self.state.lock().unwrap().scripted_faults.push_back(fault);
    }

    pub fn sent_frames(&self) -> Vec<BusFrame> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn send_attempts(&self) -> u32 {
        self.state.lock().unwrap().send_attempts
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl BusTransport for MockBus {
    async fn recv(&mut self, _max_wait: Duration) -> Result<Option<BusFrame>, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BusError::Closed);
        }
        Ok(state.rx_queue.pop_front())
    }

    async fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(BusError::Closed);
        }
        state.send_attempts += 1;
        match state.scripted_faults.pop_front() {
            Some(SendFault::Backlogged) => Err(BusError::Backlogged),
            Some(SendFault::Fault) => Err(BusError::Transport("scripted fault".into())),
            None => {
                state.sent.push(frame.clone());
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), BusError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// SocketCAN-backed transport.
#[cfg(all(target_os = "linux", feature = "can-linux"))]
pub use self::linux::SocketCanBus;

#[cfg(all(target_os = "linux", feature = "can-linux"))]
mod linux {
    use super::{BusError, BusFilter, BusFrame, BusTransport};
    use async_trait::async_trait;
    use socketcan::{CanFilter, CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, SocketOptions, StandardId};
    use std::io;
    use std::time::Duration;
    use tracing::{debug, warn};

    const ENOBUFS: i32 = 105;

    pub struct SocketCanBus {
        socket: CanSocket,
        interface: String,
    }

    impl SocketCanBus {
        /// Open the named interface and install the receive filters.
        pub fn open(interface: &str, filters: &[BusFilter]) -> Result<Self, BusError> {
            let socket = CanSocket::open(interface)
                .map_err(|e| BusError::Transport(format!("open {interface}: {e}")))?;
            let kernel: Vec<CanFilter> = filters
                .iter()
                .map(|f| CanFilter::new(f.id, f.mask))
                .collect();
            socket
                .set_filters(kernel.as_slice())
                .map_err(|e| BusError::Transport(format!("set filters: {e}")))?;
            debug!(interface, filters = filters.len(), "CAN interface opened");
            Ok(Self {
                socket,
                interface: interface.to_string(),
            })
        }

        fn map_send_err(e: io::Error) -> BusError {
            if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(ENOBUFS) {
                BusError::Backlogged
            } else {
                BusError::Transport(e.to_string())
            }
        }
    }

    #[async_trait]
    impl BusTransport for SocketCanBus {
        async fn recv(&mut self, max_wait: Duration) -> Result<Option<BusFrame>, BusError> {
            // The socket read blocks for at most `max_wait`; run it on the
            // blocking pool so the executor keeps breathing.
            tokio::task::block_in_place(|| match self.socket.read_frame_timeout(max_wait) {
                Ok(CanFrame::Data(frame)) => Ok(Some(BusFrame::new(
                    frame.raw_id(),
                    frame.data().to_vec(),
                )?)),
                // Remote requests carry no payload this node cares about.
                Ok(CanFrame::Remote(_)) => Ok(None),
                Ok(CanFrame::Error(e)) => {
                    warn!(interface = %self.interface, "error frame on bus: {e:?}");
                    Err(BusError::Transport("error frame".into()))
                }
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(e) => Err(BusError::Transport(e.to_string())),
            })
        }

        async fn send(&mut self, frame: &BusFrame) -> Result<(), BusError> {
            let id = StandardId::new(frame.id() as u16)
                .ok_or(BusError::InvalidFrame("standard id exceeds 0x7FF"))?;
            let out = CanFrame::new(id, frame.data())
                .ok_or(BusError::InvalidFrame("payload exceeds 8 bytes"))?;
            tokio::task::block_in_place(|| {
                self.socket.write_frame(&out).map_err(Self::map_send_err)
            })
        }

        async fn close(&mut self) -> Result<(), BusError> {
            // The kernel socket is released on drop; nothing further to do.
            debug!(interface = %self.interface, "CAN interface closed");
            Ok(())
        }
    }
}
