//! Pluggable observers, registered in order and notified in that same
//! order. Grounded on the teacher's `handler::HandlerList` (a
//! `Vec<Arc<dyn Handler>>` dispatched in registration order) and the
//! original `CFragmentHandler`'s family of `Observer` base classes.

use std::sync::{Arc, RwLock};

use evb_wire::Fragment;

use crate::source_queue::BarrierSummary;

pub trait EventReadyObserver: Send + Sync {
    fn on_event_ready(&self, event: &[Fragment]);
}

pub trait DataLateObserver: Send + Sync {
    fn on_data_late(&self, fragment: &Fragment, current_oldest: u64);
}

pub trait GoodBarrierObserver: Send + Sync {
    fn on_good_barrier(&self, summary: &BarrierSummary);
}

pub trait PartialBarrierObserver: Send + Sync {
    fn on_partial_barrier(&self, summary: &BarrierSummary);
}

pub trait DuplicateTimestampObserver: Send + Sync {
    fn on_duplicate_timestamp(&self, source_id: u32, timestamp: u64);
}

pub trait NonMonotonicTimestampObserver: Send + Sync {
    fn on_non_monotonic_timestamp(&self, source_id: u32, prior_timestamp: u64, this_timestamp: u64);
}

/// Global and per-queue Xon/Xoff notifications. Default no-op bodies let
/// an implementer subscribe to only the events it cares about, matching
/// the original's separate `Xon()`/`Xon(qid)`/`Xoff()`/`Xoff(qid)` overloads
/// folded into one trait.
pub trait FlowControlObserver: Send + Sync {
    fn on_xoff(&self) {}
    fn on_xon(&self) {}
    fn on_xoff_queue(&self, _queue_id: u32) {}
    fn on_xon_queue(&self, _queue_id: u32) {}
}

macro_rules! observer_list {
    ($field:ident, $trait:ty, $register:ident, $notify:ident, ($($arg:ident : $ty:ty),*), $method:ident) => {
        pub fn $register(&self, observer: Arc<dyn $trait>) {
            self.$field.write().expect("observer list poisoned").push(observer);
        }

        pub fn $notify(&self, $($arg: $ty),*) {
            for obs in self.$field.read().expect("observer list poisoned").iter() {
                obs.$method($($arg),*);
            }
        }
    };
}

/// All six observer categories, each guarded by its own `RwLock` so a
/// slow observer in one category never blocks notification of another.
#[derive(Default)]
pub struct ObserverRegistry {
    event_ready: RwLock<Vec<Arc<dyn EventReadyObserver>>>,
    data_late: RwLock<Vec<Arc<dyn DataLateObserver>>>,
    good_barrier: RwLock<Vec<Arc<dyn GoodBarrierObserver>>>,
    partial_barrier: RwLock<Vec<Arc<dyn PartialBarrierObserver>>>,
    duplicate_timestamp: RwLock<Vec<Arc<dyn DuplicateTimestampObserver>>>,
    non_monotonic_timestamp: RwLock<Vec<Arc<dyn NonMonotonicTimestampObserver>>>,
    flow_control: RwLock<Vec<Arc<dyn FlowControlObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    observer_list!(
        event_ready,
        EventReadyObserver,
        add_event_ready_observer,
        notify_event_ready,
        (event: &[Fragment]),
        on_event_ready
    );

    observer_list!(
        data_late,
        DataLateObserver,
        add_data_late_observer,
        notify_data_late,
        (fragment: &Fragment, current_oldest: u64),
        on_data_late
    );

    observer_list!(
        good_barrier,
        GoodBarrierObserver,
        add_good_barrier_observer,
        notify_good_barrier,
        (summary: &BarrierSummary),
        on_good_barrier
    );

    observer_list!(
        partial_barrier,
        PartialBarrierObserver,
        add_partial_barrier_observer,
        notify_partial_barrier,
        (summary: &BarrierSummary),
        on_partial_barrier
    );

    observer_list!(
        duplicate_timestamp,
        DuplicateTimestampObserver,
        add_duplicate_timestamp_observer,
        notify_duplicate_timestamp,
        (source_id: u32, timestamp: u64),
        on_duplicate_timestamp
    );

    observer_list!(
        non_monotonic_timestamp,
        NonMonotonicTimestampObserver,
        add_non_monotonic_timestamp_observer,
        notify_non_monotonic_timestamp,
        (source_id: u32, prior_timestamp: u64, this_timestamp: u64),
        on_non_monotonic_timestamp
    );

    pub fn add_flow_control_observer(&self, observer: Arc<dyn FlowControlObserver>) {
        self.flow_control
            .write()
            .expect("observer list poisoned")
            .push(observer);
    }

    pub fn notify_xoff(&self) {
        for obs in self.flow_control.read().expect("observer list poisoned").iter() {
            obs.on_xoff();
        }
    }

    pub fn notify_xon(&self) {
        for obs in self.flow_control.read().expect("observer list poisoned").iter() {
            obs.on_xon();
        }
    }

    pub fn notify_xoff_queue(&self, queue_id: u32) {
        for obs in self.flow_control.read().expect("observer list poisoned").iter() {
            obs.on_xoff_queue(queue_id);
        }
    }

    pub fn notify_xon_queue(&self, queue_id: u32) {
        for obs in self.flow_control.read().expect("observer list poisoned").iter() {
            obs.on_xon_queue(queue_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl DuplicateTimestampObserver for Counter {
        fn on_duplicate_timestamp(&self, _source_id: u32, _timestamp: u64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observers_fire_in_registration_order() {
        use std::sync::Mutex;

        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(Arc<Mutex<Vec<u32>>>, u32);
        impl DuplicateTimestampObserver for Tagged {
            fn on_duplicate_timestamp(&self, _source_id: u32, _timestamp: u64) {
                self.0.lock().unwrap().push(self.1);
            }
        }

        let registry = ObserverRegistry::new();
        registry.add_duplicate_timestamp_observer(Arc::new(Tagged(order.clone(), 1)));
        registry.add_duplicate_timestamp_observer(Arc::new(Tagged(order.clone(), 2)));
        registry.add_duplicate_timestamp_observer(Arc::new(Tagged(order.clone(), 3)));

        registry.notify_duplicate_timestamp(7, 100);

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn all_registered_observers_are_notified() {
        let registry = ObserverRegistry::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add_duplicate_timestamp_observer(counter.clone());
        registry.notify_duplicate_timestamp(1, 2);
        registry.notify_duplicate_timestamp(1, 3);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    struct NoOpFlow;
    impl FlowControlObserver for NoOpFlow {}

    #[test]
    fn flow_control_default_methods_are_noops() {
        let registry = ObserverRegistry::new();
        registry.add_flow_control_observer(Arc::new(NoOpFlow));
        registry.notify_xon();
        registry.notify_xoff();
        registry.notify_xon_queue(0);
        registry.notify_xoff_queue(0);
    }
}
