//! Network link capability
//!
//! TCP bridges can't do anything until the radio has a link. The engine only
//! polls this; bringing the link up is someone else's job.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the underlying network link is usable
pub trait Connectivity: Send + Sync {
    fn is_up(&self) -> bool;
}

/// For hosts that are always on a network (desktop builds, tests)
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUp;

impl Connectivity for AlwaysUp {
    fn is_up(&self) -> bool {
        true
    }
}

/// Link flag shared between whoever watches the network and the engines.
/// Clones see the same state; reads never wait on anything.
#[derive(Debug, Clone, Default)]
pub struct SharedLink(Arc<AtomicBool>);

impl SharedLink {
    pub fn new(up: bool) -> Self {
        Self(Arc::new(AtomicBool::new(up)))
    }

    pub fn set(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }
}

impl Connectivity for SharedLink {
    fn is_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
