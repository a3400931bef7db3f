//! Connection lifecycle: the reconnect supervisor and the per-connection
//! helpers it starts once media is flowing.

pub mod frame_rate;
pub mod supervisor;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::transport::webrtc::DataChannel;

/// Shared view of the current connection's data channel. The supervisor
/// replaces or clears it on every reconnect; input senders read it per send.
#[derive(Clone, Default)]
pub struct DataChannelSlot {
    inner: Arc<RwLock<Option<Arc<dyn DataChannel>>>>,
}

impl DataChannelSlot {
    pub fn set(&self, channel: Arc<dyn DataChannel>) {
        *self.inner.write() = Some(channel);
    }

    pub fn clear(&self) {
        self.inner.write().take();
    }

    pub fn current(&self) -> Option<Arc<dyn DataChannel>> {
        self.inner.read().clone()
    }
}

impl std::fmt::Debug for DataChannelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DataChannelSlot").field(&self.current()).finish()
    }
}
