//! Like/unlike gestures as an explicit per-item state machine.
//!
//! `on_toggle` is the only path that writes to the store, and it issues
//! exactly one `add` or `remove` per accepted gesture. `render` and
//! `apply_liked_set` move items between states without side effects, so a
//! UI that re-renders a checkbox can never loop back into a write.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use shelf_core::{CancelHandle, ItemId, LikedSet, ShelfError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{LikedFeed, PreferenceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleState {
    Unliked,
    Liked,
    /// Write in flight; the UI already shows `target`.
    Pending { target: bool, prior: bool },
}

impl ToggleState {
    pub fn stable(liked: bool) -> Self { if liked { Self::Liked } else { Self::Unliked } }

    /// What the UI shows.
    pub fn rendered(self) -> bool {
        match self {
            Self::Unliked => false,
            Self::Liked => true,
            Self::Pending { target, .. } => target,
        }
    }

    pub fn is_pending(self) -> bool { matches!(self, Self::Pending { .. }) }
}

/// Transient, non-blocking messages for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleNotice {
    Added(ItemId),
    Removed(ItemId),
    /// The write failed and the item went back to `reverted_to`.
    Failed { id: ItemId, reverted_to: bool, error: ShelfError },
}

#[derive(Debug)]
struct Entry {
    state: ToggleState,
    // bumped per accepted gesture; acks for older gestures are ignored
    seq: u64,
    // resolves when the latest write for this item has settled; the next
    // write waits on it so the store applies gestures in order
    tail: Option<oneshot::Receiver<()>>,
}

impl Default for Entry {
    fn default() -> Self { Self { state: ToggleState::Unliked, seq: 0, tail: None } }
}

#[derive(Clone)]
pub struct LikeToggleController {
    store: Arc<dyn PreferenceStore>,
    items: Arc<Mutex<FxHashMap<ItemId, Entry>>>,
    notices: mpsc::UnboundedSender<ToggleNotice>,
}

impl LikeToggleController {
    pub fn new(store: Arc<dyn PreferenceStore>) -> (Self, mpsc::UnboundedReceiver<ToggleNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        (Self { store, items: Arc::new(Mutex::new(FxHashMap::default())), notices }, rx)
    }

    fn items(&self) -> MutexGuard<'_, FxHashMap<ItemId, Entry>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, id: ItemId) -> ToggleState {
        self.items().get(&id).map(|e| e.state).unwrap_or(ToggleState::Unliked)
    }

    pub fn rendered(&self, id: ItemId) -> bool { self.state(id).rendered() }

    /// Handle a UI gesture. Returns the write task, or `None` when the gesture
    /// matches what is already shown (the echo of a programmatic render).
    /// The task resolves to the notice it emitted; superseded writes emit none.
    /// Writes for one item reach the store in gesture order.
    pub fn on_toggle(&self, id: ItemId, desired: bool) -> Option<JoinHandle<Option<ToggleNotice>>> {
        let (done, done_rx) = oneshot::channel::<()>();
        let (seq, prev) = {
            let mut items = self.items();
            let entry = items.entry(id).or_default();
            let prior = match entry.state {
                ToggleState::Pending { target, .. } if target == desired => return None,
                ToggleState::Pending { prior, .. } => prior,
                stable if stable.rendered() == desired => return None,
                stable => stable.rendered(),
            };
            entry.state = ToggleState::Pending { target: desired, prior };
            entry.seq += 1;
            (entry.seq, entry.tail.replace(done_rx))
        };
        debug!(%id, desired, seq, queued = prev.is_some(), "toggle: pending");
        let me = self.clone();
        Some(tokio::spawn(async move {
            if let Some(prev) = prev {
                // Err means the earlier task is gone; either way it is done
                let _ = prev.await;
            }
            let res = if desired { me.store.add(id).await } else { me.store.remove(id).await };
            let notice = me.settle(id, seq, desired, res);
            drop(done);
            notice
        }))
    }

    fn settle(&self, id: ItemId, seq: u64, desired: bool, res: Result<(), ShelfError>) -> Option<ToggleNotice> {
        let notice = {
            let mut items = self.items();
            let entry = items.get_mut(&id)?;
            if entry.seq != seq {
                debug!(%id, seq, current = entry.seq, ok = res.is_ok(), "toggle: superseded ack ignored");
                return None;
            }
            match res {
                Ok(()) => {
                    entry.state = ToggleState::stable(desired);
                    if desired { ToggleNotice::Added(id) } else { ToggleNotice::Removed(id) }
                }
                Err(error) => {
                    // a feed delivery may have settled the item already; keep it
                    let shown = match entry.state {
                        ToggleState::Pending { prior, .. } => prior,
                        stable => stable.rendered(),
                    };
                    entry.state = ToggleState::stable(shown);
                    warn!(%id, desired, reverted_to = shown, error = %error, "toggle: write failed; reverted");
                    ToggleNotice::Failed { id, reverted_to: shown, error }
                }
            }
        };
        info!(?notice, "toggle: settled");
        // the UI may not listen for notices
        let _ = self.notices.send(notice.clone());
        Some(notice)
    }

    /// Set the shown state without writing. A pending item only moves when
    /// `liked` confirms its target.
    pub fn render(&self, id: ItemId, liked: bool) {
        let mut items = self.items();
        let entry = items.entry(id).or_default();
        match entry.state {
            ToggleState::Pending { target, .. } if target != liked => {}
            _ => entry.state = ToggleState::stable(liked),
        }
    }

    /// Reconcile every tracked item with a delivered liked set.
    pub fn apply_liked_set(&self, liked: &LikedSet) {
        let mut items = self.items();
        for (id, entry) in items.iter_mut() {
            let now = liked.contains(*id);
            match entry.state {
                ToggleState::Pending { target, .. } if target != now => {}
                _ => entry.state = ToggleState::stable(now),
            }
        }
    }

    /// Apply feed deliveries in the background until the feed ends.
    pub fn follow(&self, mut feed: LikedFeed) -> CancelHandle {
        let me = self.clone();
        let task = tokio::spawn(async move {
            while let Some(set) = feed.rx.recv().await {
                me.apply_liked_set(&set);
            }
            feed.cancel.cancel();
        });
        CancelHandle::new(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_renders_its_target() {
        assert!(!ToggleState::Unliked.rendered());
        assert!(ToggleState::Liked.rendered());
        assert!(ToggleState::Pending { target: true, prior: false }.rendered());
        assert!(!ToggleState::Pending { target: false, prior: true }.rendered());
        assert!(!ToggleState::stable(true).is_pending());
    }
}
