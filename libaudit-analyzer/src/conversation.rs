//! Reassembled stream fragments, per-direction stream readers and the
//! merged conversation view handed to application decoders.

use crate::tcp_fsm::TcpDirection;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One contiguous run of reassembled bytes from one direction.
#[derive(Clone, Debug)]
pub struct DataFragment {
    pub dir: TcpDirection,
    pub data: Vec<u8>,
    pub ts_nanos: i64,
}

/// Stable conversation order: capture time first, direction as tiebreaker.
pub fn sort_fragments(fragments: &mut [DataFragment]) {
    fragments.sort_by(|a, b| match a.ts_nanos.cmp(&b.ts_nanos) {
        Ordering::Equal => a.dir.index().cmp(&b.dir.index()),
        other => other,
    });
}

/// Client-oriented view of a completed conversation.
#[derive(Clone, Debug, Default)]
pub struct ConversationInfo {
    /// Merged fragments of both directions, in conversation order
    pub data: Vec<DataFragment>,
    pub ident: String,
    pub first_client_packet: i64,
    pub first_server_packet: i64,
    pub client_ip: String,
    pub server_ip: String,
    pub client_port: u16,
    pub server_port: u16,
}

impl ConversationInfo {
    fn direction_data(&self, dir: TcpDirection) -> Vec<u8> {
        let mut out = Vec::new();
        for f in self.data.iter().filter(|f| f.dir == dir) {
            out.extend_from_slice(&f.data);
        }
        out
    }

    /// All client→server bytes, in order
    pub fn client_data(&self) -> Vec<u8> {
        self.direction_data(TcpDirection::ClientToServer)
    }

    /// All server→client bytes, in order
    pub fn server_data(&self) -> Vec<u8> {
        self.direction_data(TcpDirection::ServerToClient)
    }

    pub fn total_size(&self) -> usize {
        self.data.iter().map(|f| f.data.len()).sum()
    }

    /// First fragment of a direction, used by decoder selection
    pub fn head(&self, dir: TcpDirection) -> &[u8] {
        self.data
            .iter()
            .find(|f| f.dir == dir)
            .map(|f| f.data.as_slice())
            .unwrap_or(&[])
    }
}

/// Reverse a `src:port -> dst:port` identifier.
pub fn reverse_ident(ident: &str) -> String {
    match ident.split_once(" -> ") {
        Some((a, b)) => format!("{} -> {}", b, a),
        None => ident.to_string(),
    }
}

/// A reassembled chunk on its way to a stream reader.
pub struct StreamData {
    pub data: Vec<u8>,
    pub ts_nanos: i64,
    pub dir: TcpDirection,
}

#[derive(Default)]
pub struct ReaderState {
    pub fragments: Vec<DataFragment>,
    pub saved: bool,
    pub first_packet_nanos: Option<i64>,
}

/// Per-direction consumer of reassembled fragments.
///
/// Each reader owns one worker draining a bounded channel; the sender side
/// blocks when the application side is slow, which is the back-pressure
/// path.
pub struct StreamReader {
    state: Arc<Mutex<ReaderState>>,
    tx: Option<Sender<StreamData>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamReader {
    pub fn spawn(capacity: usize) -> StreamReader {
        let state = Arc::new(Mutex::new(ReaderState::default()));
        let (tx, rx): (Sender<StreamData>, Receiver<StreamData>) = bounded(capacity);
        let worker_state = state.clone();
        let handle = std::thread::spawn(move || {
            for sd in rx {
                let mut st = worker_state.lock().unwrap();
                if st.first_packet_nanos.is_none() {
                    st.first_packet_nanos = Some(sd.ts_nanos);
                }
                st.fragments.push(DataFragment {
                    dir: sd.dir,
                    data: sd.data,
                    ts_nanos: sd.ts_nanos,
                });
            }
        });
        StreamReader {
            state,
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    /// Enqueue a fragment; false when the reader already shut down
    pub fn feed(&self, sd: StreamData) -> bool {
        match &self.tx {
            Some(tx) => tx.send(sd).is_ok(),
            None => false,
        }
    }

    /// Close the channel and wait for the worker to drain it.
    pub fn close_and_join(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    pub fn saved(&self) -> bool {
        self.state.lock().unwrap().saved
    }

    pub fn mark_saved(&self) {
        self.state.lock().unwrap().saved = true;
    }

    pub fn first_packet_nanos(&self) -> Option<i64> {
        self.state.lock().unwrap().first_packet_nanos
    }

    pub fn fragments(&self) -> Vec<DataFragment> {
        self.state.lock().unwrap().fragments.clone()
    }

    /// Re-tag every stored fragment, part of the direction-correction pass
    pub fn set_direction(&self, dir: TcpDirection) {
        let mut st = self.state.lock().unwrap();
        for f in st.fragments.iter_mut() {
            f.dir = dir;
        }
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_sort_by_time_then_direction() {
        let mut frags = vec![
            DataFragment {
                dir: TcpDirection::ServerToClient,
                data: b"b".to_vec(),
                ts_nanos: 2,
            },
            DataFragment {
                dir: TcpDirection::ClientToServer,
                data: b"a".to_vec(),
                ts_nanos: 1,
            },
            DataFragment {
                dir: TcpDirection::ClientToServer,
                data: b"c".to_vec(),
                ts_nanos: 2,
            },
        ];
        sort_fragments(&mut frags);
        assert_eq!(frags[0].data, b"a");
        assert_eq!(frags[1].data, b"c");
        assert_eq!(frags[2].data, b"b");
    }

    #[test]
    fn reader_collects_fragments_in_order() {
        let mut reader = StreamReader::spawn(4);
        for (n, chunk) in [b"one", b"two"].iter().enumerate() {
            assert!(reader.feed(StreamData {
                data: chunk.to_vec(),
                ts_nanos: n as i64,
                dir: TcpDirection::ClientToServer,
            }));
        }
        reader.close_and_join();
        let frags = reader.fragments();
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].data, b"one");
        assert_eq!(reader.first_packet_nanos(), Some(0));
    }

    #[test]
    fn ident_reversal() {
        assert_eq!(
            reverse_ident("10.0.0.1:1234 -> 10.0.0.2:80"),
            "10.0.0.2:80 -> 10.0.0.1:1234"
        );
    }
}
