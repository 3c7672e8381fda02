//! Data buckets
//!
//! A bucket is one fixed-size cube of voxel data at one zoom step. Buckets
//! are owned by the [`BucketPool`](super::BucketPool); everything else only
//! holds `Arc`s to them. State changes are announced to explicit
//! subscribers over channels, so no callback ever outlives its owner.

use super::address::ZoomedAddress;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Identity of a bucket object
///
/// Two buckets at the same address created at different times have
/// different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub u64);

/// Load state of a bucket's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Unrequested,
    Loading,
    Loaded,
}

/// Things that happen to a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketEvent {
    /// Payload arrived
    Loaded,
    /// Payload was mutated in place
    Labeled,
    /// Backing storage was reclaimed; terminal
    Collected,
}

/// Delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketNotification {
    pub bucket: BucketId,
    pub event: BucketEvent,
}

/// Handle of one subscription on one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Events a subscriber wants to hear about
///
/// `loaded` is one-shot: it is dropped after the first delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketInterest {
    pub loaded: bool,
    pub labeled: bool,
    pub collected: bool,
}

impl BucketInterest {
    fn wants(&self, event: BucketEvent) -> bool {
        match event {
            BucketEvent::Loaded => self.loaded,
            BucketEvent::Labeled => self.labeled,
            BucketEvent::Collected => self.collected,
        }
    }

    fn is_empty(&self) -> bool {
        !(self.loaded || self.labeled || self.collected)
    }
}

struct Listener {
    id: SubscriptionId,
    interest: BucketInterest,
    sender: Sender<BucketNotification>,
}

struct BucketInner {
    state: BucketState,
    data: Option<Vec<u8>>,
    listeners: Vec<Listener>,
    next_subscription: u64,
    visualized: bool,
    collected: bool,
}

pub struct DataBucket {
    id: BucketId,
    address: ZoomedAddress,
    fallback: Option<Weak<DataBucket>>,
    inner: RwLock<BucketInner>,
}

impl DataBucket {
    pub fn new(id: BucketId, address: ZoomedAddress, fallback: Option<&Arc<DataBucket>>) -> Self {
        Self {
            id,
            address,
            fallback: fallback.map(Arc::downgrade),
            inner: RwLock::new(BucketInner {
                state: BucketState::Unrequested,
                data: None,
                listeners: Vec::new(),
                next_subscription: 0,
                visualized: false,
                collected: false,
            }),
        }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    pub fn address(&self) -> ZoomedAddress {
        self.address
    }

    pub fn zoom_step(&self) -> u32 {
        self.address.zoom_step
    }

    pub fn state(&self) -> BucketState {
        self.inner.read().state
    }

    pub fn has_data(&self) -> bool {
        self.inner.read().data.is_some()
    }

    pub fn is_collected(&self) -> bool {
        self.inner.read().collected
    }

    /// The bucket one zoom step coarser, if it is still alive
    pub fn fallback_bucket(&self) -> Option<Arc<DataBucket>> {
        self.fallback.as_ref().and_then(Weak::upgrade)
    }

    /// Run `f` on the payload, if there is one
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.inner.read().data.as_deref().map(f)
    }

    /// Move from `Unrequested` to `Loading`; returns whether the state changed
    pub fn mark_as_pulled(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.state != BucketState::Unrequested || inner.collected {
            return false;
        }
        inner.state = BucketState::Loading;
        true
    }

    pub fn receive_data(&self, data: Vec<u8>) {
        {
            let mut inner = self.inner.write();
            if inner.collected {
                log::debug!(
                    "[data_bucket::receive_data] Dropping payload for collected bucket {}",
                    self.address
                );
                return;
            }
            inner.state = BucketState::Loaded;
            inner.data = Some(data);
        }
        self.notify(BucketEvent::Loaded);
    }

    /// Mutate the payload; returns false if there is no payload
    ///
    /// `f` works on a copy and runs without holding the bucket's lock, so it
    /// may read the bucket itself. The copy replaces the payload afterwards
    /// unless the bucket was collected in the meantime.
    pub fn label(&self, f: impl FnOnce(&mut [u8])) -> bool {
        let Some(mut labeled) = self.inner.read().data.clone() else {
            return false;
        };
        f(&mut labeled);
        {
            let mut inner = self.inner.write();
            if inner.collected || inner.data.is_none() {
                return false;
            }
            inner.data = Some(labeled);
        }
        self.notify(BucketEvent::Labeled);
        true
    }

    /// Reclaim the payload; subscribers hear `Collected` once and are dropped
    pub fn collect(&self) {
        {
            let mut inner = self.inner.write();
            if inner.collected {
                return;
            }
            inner.collected = true;
            inner.data = None;
            inner.state = BucketState::Unrequested;
        }
        self.notify(BucketEvent::Collected);
        self.inner.write().listeners.clear();
    }

    pub fn subscribe(
        &self,
        interest: BucketInterest,
        sender: Sender<BucketNotification>,
    ) -> SubscriptionId {
        let mut inner = self.inner.write();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        if !inner.collected && !interest.is_empty() {
            inner.listeners.push(Listener {
                id,
                interest,
                sender,
            });
        }
        id
    }

    /// Idempotent
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.write().listeners.retain(|l| l.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.read().listeners.len()
    }

    pub fn visualize(&self) {
        self.inner.write().visualized = true;
    }

    pub fn unvisualize(&self) {
        self.inner.write().visualized = false;
    }

    pub fn is_visualized(&self) -> bool {
        self.inner.read().visualized
    }

    fn notify(&self, event: BucketEvent) {
        let senders: Vec<Sender<BucketNotification>> = {
            let mut inner = self.inner.write();
            let senders = inner
                .listeners
                .iter()
                .filter(|l| l.interest.wants(event))
                .map(|l| l.sender.clone())
                .collect();
            if event == BucketEvent::Loaded {
                for listener in inner.listeners.iter_mut() {
                    listener.interest.loaded = false;
                }
                inner.listeners.retain(|l| !l.interest.is_empty());
            }
            senders
        };

        let notification = BucketNotification {
            bucket: self.id,
            event,
        };
        for sender in senders {
            if sender.send(notification).is_err() {
                log::trace!(
                    "[data_bucket::notify] Subscriber of {} is gone",
                    self.address
                );
            }
        }
    }
}

impl std::fmt::Debug for DataBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBucket")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn bucket(id: u64) -> DataBucket {
        DataBucket::new(BucketId(id), ZoomedAddress::new(0, 0, 0, 0), None)
    }

    const ALL: BucketInterest = BucketInterest {
        loaded: true,
        labeled: true,
        collected: true,
    };

    #[test]
    fn test_load_lifecycle() {
        let bucket = bucket(1);
        assert_eq!(bucket.state(), BucketState::Unrequested);
        assert!(bucket.mark_as_pulled());
        assert!(!bucket.mark_as_pulled());
        assert_eq!(bucket.state(), BucketState::Loading);

        bucket.receive_data(vec![1, 2, 3]);
        assert_eq!(bucket.state(), BucketState::Loaded);
        assert_eq!(bucket.with_data(|d| d.to_vec()), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_loaded_is_one_shot() {
        let bucket = bucket(1);
        let (tx, rx) = unbounded();
        bucket.subscribe(
            BucketInterest {
                loaded: true,
                ..Default::default()
            },
            tx,
        );

        bucket.receive_data(vec![0; 4]);
        bucket.receive_data(vec![1; 4]);

        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(bucket.subscriber_count(), 0);
    }

    #[test]
    fn test_label_notifies_and_mutates() {
        let bucket = bucket(7);
        let (tx, rx) = unbounded();
        assert!(!bucket.label(|d| d[0] = 9));

        bucket.receive_data(vec![0; 4]);
        bucket.subscribe(ALL, tx);
        assert!(bucket.label(|d| d[0] = 9));

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![BucketNotification {
                bucket: BucketId(7),
                event: BucketEvent::Labeled
            }]
        );
        assert_eq!(bucket.with_data(|d| d[0]), Some(9));
    }

    #[test]
    fn test_label_may_read_the_bucket() {
        let bucket = bucket(8);
        bucket.receive_data(vec![3, 0]);
        let labeled = bucket.label(|d| {
            assert!(bucket.has_data());
            d[1] = bucket.with_data(|old| old[0] + 1).unwrap_or_default();
        });
        assert!(labeled);
        assert_eq!(bucket.with_data(|d| d.to_vec()), Some(vec![3, 4]));
    }

    #[test]
    fn test_label_after_collect_is_dropped() {
        let bucket = bucket(9);
        bucket.receive_data(vec![1]);
        assert!(!bucket.label(|_| bucket.collect()));
        assert!(!bucket.has_data());
    }

    #[test]
    fn test_collect_is_terminal() {
        let bucket = bucket(2);
        let (tx, rx) = unbounded();
        bucket.receive_data(vec![0; 4]);
        bucket.subscribe(ALL, tx.clone());

        bucket.collect();
        bucket.collect();

        assert_eq!(rx.try_iter().count(), 1);
        assert!(!bucket.has_data());
        assert_eq!(bucket.subscriber_count(), 0);

        // Collected buckets accept neither subscribers nor payloads
        bucket.subscribe(ALL, tx);
        bucket.receive_data(vec![0; 4]);
        assert_eq!(bucket.subscriber_count(), 0);
        assert!(!bucket.has_data());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bucket = bucket(3);
        let (tx, rx) = unbounded();
        let id = bucket.subscribe(ALL, tx);
        bucket.unsubscribe(id);
        bucket.unsubscribe(id);
        bucket.receive_data(vec![0; 4]);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_fallback_is_weak() {
        let coarse = Arc::new(DataBucket::new(
            BucketId(1),
            ZoomedAddress::new(0, 0, 0, 1),
            None,
        ));
        let fine = DataBucket::new(BucketId(2), ZoomedAddress::new(1, 1, 1, 0), Some(&coarse));
        assert_eq!(fine.fallback_bucket().map(|b| b.id()), Some(BucketId(1)));

        drop(coarse);
        assert!(fine.fallback_bucket().is_none());
    }
}
