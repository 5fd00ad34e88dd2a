//! IPv4 defragmentation engine.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Partial buffers are keyed by source, destination, IP identification and
/// protocol, so interleaved fragment trains do not collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u16,
    pub proto: u8,
}

/// Result of feeding one fragment to the engine.
pub enum Fragment<'a> {
    /// Data is not fragmented - return original slice
    NoFrag(&'a [u8]),
    /// Data was defragmented - return reassembled payload
    Complete(Vec<u8>),
    /// Fragment is part of a (yet) unfinished buffer
    Incomplete,
    /// Defragmentation error
    Error,
}

/// Defragmentation engine
pub trait DefragEngine: Send {
    /// Update the engine with a new fragment. `frag_offset` is in bytes.
    fn update<'a>(
        &mut self,
        key: FragmentKey,
        frag_offset: usize,
        more_fragments: bool,
        frag: &'a [u8],
    ) -> Fragment<'a>;
}

#[derive(Default)]
pub struct Ipv4DefragEngine {
    ip_fragments: HashMap<FragmentKey, Vec<u8>>,
}

impl Ipv4DefragEngine {
    pub fn new() -> Ipv4DefragEngine {
        Ipv4DefragEngine::default()
    }

    pub fn len(&self) -> usize {
        self.ip_fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ip_fragments.is_empty()
    }
}

/// Reassembly strategy: the last fragment wins on overlap, holes are padded.
fn append_fragment(buffer: &mut Vec<u8>, frag_offset: usize, frag: &[u8]) {
    if frag_offset < buffer.len() {
        warn!(
            "overlapping fragment frag_offset {}, buffer len {}",
            frag_offset,
            buffer.len()
        );
        buffer.truncate(frag_offset);
    } else if frag_offset > buffer.len() {
        warn!(
            "missed fragment frag_offset {}, buffer len {}",
            frag_offset,
            buffer.len()
        );
        buffer.resize(frag_offset, 0xff);
    }
    buffer.extend_from_slice(frag);
}

impl DefragEngine for Ipv4DefragEngine {
    fn update<'a>(
        &mut self,
        key: FragmentKey,
        frag_offset: usize,
        more_fragments: bool,
        frag: &'a [u8],
    ) -> Fragment<'a> {
        if !more_fragments {
            if frag_offset == 0 {
                return Fragment::NoFrag(frag);
            }
            // last fragment of a train
            return match self.ip_fragments.remove(&key) {
                None => {
                    warn!("could not get first fragment buffer for {:?}", key);
                    Fragment::Error
                }
                Some(mut buffer) => {
                    append_fragment(&mut buffer, frag_offset, frag);
                    Fragment::Complete(buffer)
                }
            };
        }
        // fragment is part of a larger buffer
        if frag_offset == 0 {
            trace!("first fragment for {:?} len={}", key, frag.len());
            if self.ip_fragments.contains_key(&key) {
                warn!("IPv4 defrag collision for {:?}", key);
            }
            self.ip_fragments.insert(key, frag.to_vec());
        } else {
            match self.ip_fragments.get_mut(&key) {
                Some(buffer) => append_fragment(buffer, frag_offset, frag),
                None => warn!("could not get first fragment buffer for {:?}", key),
            }
        }
        Fragment::Incomplete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FragmentKey {
        FragmentKey {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            id: 7,
            proto: 6,
        }
    }

    #[test]
    fn two_fragment_train() {
        let mut engine = Ipv4DefragEngine::new();
        match engine.update(key(), 0, true, b"01234567") {
            Fragment::Incomplete => (),
            _ => panic!("expected Incomplete"),
        }
        match engine.update(key(), 8, false, b"89abcdef") {
            Fragment::Complete(buf) => assert_eq!(buf, b"0123456789abcdef"),
            _ => panic!("expected Complete"),
        }
        assert!(engine.is_empty());
    }

    #[test]
    fn unfragmented_passthrough() {
        let mut engine = Ipv4DefragEngine::new();
        match engine.update(key(), 0, false, b"payload") {
            Fragment::NoFrag(d) => assert_eq!(d, b"payload"),
            _ => panic!("expected NoFrag"),
        }
    }

    #[test]
    fn missing_first_fragment_is_an_error() {
        let mut engine = Ipv4DefragEngine::new();
        match engine.update(key(), 8, false, b"89abcdef") {
            Fragment::Error => (),
            _ => panic!("expected Error"),
        }
    }
}
