use playlink_proto::IceCandidate;

/// Remote candidates that arrived before the remote description.
///
/// Candidates are held in arrival order until [`PendingIceBuffer::drain`] is
/// called once the remote description is set; after that every candidate is
/// handed straight back to the caller for immediate application.
#[derive(Debug, Default)]
pub struct PendingIceBuffer {
    pending: Vec<IceCandidate>,
    remote_description_set: bool,
}

impl PendingIceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the candidate back if it can be applied now.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.remote_description_set {
            Some(candidate)
        } else {
            self.pending.push(candidate);
            None
        }
    }

    /// Marks the remote description as set and yields the held candidates in
    /// arrival order. Subsequent calls return nothing.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.remote_description_set = true;
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
            ..IceCandidate::default()
        }
    }

    #[test_timeout::timeout]
    fn early_candidates_drain_once_in_order() {
        let mut buffer = PendingIceBuffer::new();
        for n in 1..=3 {
            assert!(buffer.offer(candidate(n)).is_none());
        }
        assert_eq!(buffer.len(), 3);

        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2), candidate(3)]);
        assert!(buffer.drain().is_empty());
        assert!(buffer.is_empty());
    }

    #[test_timeout::timeout]
    fn late_candidates_pass_straight_through() {
        let mut buffer = PendingIceBuffer::new();
        assert!(buffer.drain().is_empty());
        assert_eq!(buffer.offer(candidate(7)), Some(candidate(7)));
        assert!(buffer.is_empty());
    }
}
