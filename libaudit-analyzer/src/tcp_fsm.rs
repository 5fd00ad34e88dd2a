//! Per-connection TCP state machine and option sanity checks.

use pnet_packet::tcp::{TcpFlags, TcpPacket};
use pnet_packet::Packet;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpFsmState {
    Closed,
    SynSent,
    SynReceived,
    Established,
    CloseWait,
    LastAck,
    Reset,
}

impl fmt::Display for TcpFsmState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Segment direction relative to the connection's current orientation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TcpDirection {
    ClientToServer,
    ServerToClient,
}

impl TcpDirection {
    pub fn reverse(self) -> TcpDirection {
        match self {
            TcpDirection::ClientToServer => TcpDirection::ServerToClient,
            TcpDirection::ServerToClient => TcpDirection::ClientToServer,
        }
    }

    pub fn index(self) -> usize {
        match self {
            TcpDirection::ClientToServer => 0,
            TcpDirection::ServerToClient => 1,
        }
    }
}

impl fmt::Display for TcpDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TcpDirection::ClientToServer => write!(f, "client->server"),
            TcpDirection::ServerToClient => write!(f, "server->client"),
        }
    }
}

/// RFC-793-adjacent state tracking, deliberately forgiving: capture files
/// routinely miss parts of the handshake.
pub struct TcpFsm {
    state: TcpFsmState,
    /// accept mid-stream segments without an observed handshake
    allow_missing_init: bool,
    fin_seen: [bool; 2],
}

impl TcpFsm {
    pub fn new(allow_missing_init: bool) -> TcpFsm {
        TcpFsm {
            state: TcpFsmState::Closed,
            allow_missing_init,
            fin_seen: [false; 2],
        }
    }

    pub fn state(&self) -> TcpFsmState {
        self.state
    }

    pub fn both_fins_seen(&self) -> bool {
        self.fin_seen[0] && self.fin_seen[1]
    }

    /// Present one segment to the state machine. Returns false when the
    /// segment is not plausible in the current state.
    pub fn check(&mut self, flags: u16, dir: TcpDirection) -> bool {
        let syn = flags & TcpFlags::SYN != 0;
        let ack = flags & TcpFlags::ACK != 0;
        let fin = flags & TcpFlags::FIN != 0;
        let rst = flags & TcpFlags::RST != 0;

        if rst {
            self.state = TcpFsmState::Reset;
            return true;
        }

        let accepted = match self.state {
            TcpFsmState::Closed => {
                if syn && !ack && dir == TcpDirection::ClientToServer {
                    self.state = TcpFsmState::SynSent;
                    true
                } else if self.allow_missing_init {
                    self.state = TcpFsmState::Established;
                    true
                } else {
                    false
                }
            }
            TcpFsmState::SynSent => {
                if syn && ack && dir == TcpDirection::ServerToClient {
                    self.state = TcpFsmState::SynReceived;
                    true
                } else if syn && !ack {
                    // retransmitted SYN
                    true
                } else {
                    false
                }
            }
            TcpFsmState::SynReceived => {
                if ack && dir == TcpDirection::ClientToServer {
                    self.state = TcpFsmState::Established;
                    true
                } else if syn && ack && dir == TcpDirection::ServerToClient {
                    // retransmitted SYN-ACK
                    true
                } else {
                    false
                }
            }
            TcpFsmState::Established => {
                if fin {
                    self.state = TcpFsmState::CloseWait;
                }
                true
            }
            TcpFsmState::CloseWait => {
                if fin {
                    self.state = TcpFsmState::LastAck;
                }
                true
            }
            // trailing ACKs after the teardown are fine
            TcpFsmState::LastAck => true,
            TcpFsmState::Reset => false,
        };

        if accepted && fin {
            self.fin_seen[dir.index()] = true;
        }
        accepted
    }
}

/// Reject kinds produced by [`TcpOptionCheck`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionCheckError {
    /// Timestamp option value went backwards
    NonMonotonicTimestamp,
    /// Window scale beyond the RFC 7323 limit
    InvalidWindowScale,
}

impl fmt::Display for OptionCheckError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionCheckError::NonMonotonicTimestamp => write!(f, "non-monotonic TSval"),
            OptionCheckError::InvalidWindowScale => write!(f, "window scale > 14"),
        }
    }
}

/// Per-direction TCP option validation.
#[derive(Default)]
pub struct TcpOptionCheck {
    ts_val: [Option<u32>; 2],
}

impl TcpOptionCheck {
    pub fn new() -> TcpOptionCheck {
        TcpOptionCheck::default()
    }

    pub fn accept(&mut self, tcp: &TcpPacket, dir: TcpDirection) -> Result<(), OptionCheckError> {
        let mut opts = Vec::new();
        raw_options(tcp, &mut opts);
        let mut i = 0;
        while i < opts.len() {
            match opts[i] {
                0 => break,    // end of options
                1 => i += 1,   // nop
                kind => {
                    if i + 1 >= opts.len() {
                        break;
                    }
                    let len = opts[i + 1] as usize;
                    if len < 2 || i + len > opts.len() {
                        break;
                    }
                    match kind {
                        // window scale
                        3 if len == 3 => {
                            if opts[i + 2] > 14 {
                                return Err(OptionCheckError::InvalidWindowScale);
                            }
                        }
                        // timestamps
                        8 if len == 10 => {
                            let ts_val = u32::from_be_bytes([
                                opts[i + 2],
                                opts[i + 3],
                                opts[i + 4],
                                opts[i + 5],
                            ]);
                            let slot = &mut self.ts_val[dir.index()];
                            if let Some(last) = *slot {
                                // compare in wrapping sequence space
                                if ts_val != last && last.wrapping_sub(ts_val) < 0x8000_0000 {
                                    return Err(OptionCheckError::NonMonotonicTimestamp);
                                }
                            }
                            *slot = Some(ts_val);
                        }
                        _ => (),
                    }
                    i += len;
                }
            }
        }
        Ok(())
    }
}

/// Raw TCP option bytes: everything between the fixed header and the data
/// offset boundary.
fn raw_options(tcp: &TcpPacket, out: &mut Vec<u8>) {
    let header_len = tcp.get_data_offset() as usize * 4;
    let raw = tcp.packet();
    if header_len > 20 && raw.len() >= header_len {
        out.extend_from_slice(&raw[20..header_len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fsm_accepts_three_way_handshake() {
        let mut fsm = TcpFsm::new(false);
        assert!(fsm.check(TcpFlags::SYN, TcpDirection::ClientToServer));
        assert!(fsm.check(
            TcpFlags::SYN | TcpFlags::ACK,
            TcpDirection::ServerToClient
        ));
        assert!(fsm.check(TcpFlags::ACK, TcpDirection::ClientToServer));
        assert_eq!(fsm.state(), TcpFsmState::Established);
    }

    #[test]
    fn fsm_rejects_data_before_handshake() {
        let mut fsm = TcpFsm::new(false);
        assert!(!fsm.check(TcpFlags::ACK | TcpFlags::PSH, TcpDirection::ClientToServer));
    }

    #[test]
    fn fsm_allows_missing_establishment_when_configured() {
        let mut fsm = TcpFsm::new(true);
        assert!(fsm.check(TcpFlags::ACK | TcpFlags::PSH, TcpDirection::ServerToClient));
        assert_eq!(fsm.state(), TcpFsmState::Established);
    }

    #[test]
    fn fsm_tracks_fins() {
        let mut fsm = TcpFsm::new(true);
        assert!(fsm.check(TcpFlags::ACK, TcpDirection::ClientToServer));
        assert!(fsm.check(TcpFlags::FIN | TcpFlags::ACK, TcpDirection::ClientToServer));
        assert!(!fsm.both_fins_seen());
        assert!(fsm.check(TcpFlags::FIN | TcpFlags::ACK, TcpDirection::ServerToClient));
        assert!(fsm.both_fins_seen());
    }
}
