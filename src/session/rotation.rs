//! Device orientation tracking
//!
//! Holds the current quarter-turn rotation and notifies listeners when it
//! changes. Listeners run synchronously, in registration order, over a
//! snapshot of the list so a listener may add or remove listeners without
//! affecting the notification in progress.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::error;

use crate::error::{InvalidRotation, ListenerError};

/// Clockwise quarter turns of the device screen (0-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Rotation(u8);

impl Rotation {
    /// Natural orientation
    pub const ROTATION_0: Rotation = Rotation(0);
    /// 90 degrees clockwise
    pub const ROTATION_90: Rotation = Rotation(1);
    /// 180 degrees
    pub const ROTATION_180: Rotation = Rotation(2);
    /// 270 degrees clockwise
    pub const ROTATION_270: Rotation = Rotation(3);

    /// Number of quarter turns
    pub fn quarter_turns(&self) -> u8 {
        self.0
    }

    /// Clockwise angle in degrees
    pub fn degrees(&self) -> u32 {
        u32::from(self.0) * 90
    }

    /// True for 90 and 270 degrees, where width and height trade places
    pub fn swaps_axes(&self) -> bool {
        self.0 & 1 == 1
    }
}

impl TryFrom<u8> for Rotation {
    type Error = InvalidRotation;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value <= 3 {
            Ok(Rotation(value))
        } else {
            Err(InvalidRotation(value))
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Handle returned by [`RotationTracker::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Called with `(new, previous)` after every change
pub type RotationListener =
    Arc<dyn Fn(Rotation, Rotation) -> Result<(), ListenerError> + Send + Sync>;

/// Current rotation plus its change listeners
#[derive(Default)]
pub struct RotationTracker {
    current: Mutex<Rotation>,
    listeners: Mutex<BTreeMap<ListenerId, RotationListener>>,
    next_id: AtomicU64,
}

impl RotationTracker {
    /// Tracker at 0° with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rotation
    pub fn rotation(&self) -> Rotation {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new rotation and notifies listeners
    ///
    /// Returns the previous value if the rotation changed, `None` if it was
    /// already current.
    pub fn set_rotation(&self, rotation: Rotation) -> Option<Rotation> {
        let previous = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == rotation {
                return None;
            }
            std::mem::replace(&mut *current, rotation)
        };

        self.notify(rotation, previous);
        Some(previous)
    }

    /// Resets to the natural orientation without notifying
    pub fn reset(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Rotation::ROTATION_0;
    }

    /// Registers a listener; listeners are notified in registration order
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Rotation, Rotation) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(listener));
        id
    }

    /// Unregisters a listener; unknown ids are ignored
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Drops every listener
    pub fn clear_listeners(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, rotation: Rotation, previous: Rotation) {
        let snapshot: Vec<RotationListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(rotation, previous))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Rotation listener failed: {}", e),
                Err(_) => error!("Rotation listener panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(turns: u8) -> Rotation {
        Rotation::try_from(turns).unwrap()
    }

    #[test]
    fn test_try_from_range() {
        for turns in 0..4 {
            assert_eq!(rotation(turns).quarter_turns(), turns);
        }
        assert_eq!(Rotation::try_from(4u8), Err(InvalidRotation(4)));
        assert_eq!(Rotation::try_from(255u8), Err(InvalidRotation(255)));
        assert!(Rotation::ROTATION_90.swaps_axes());
        assert!(!Rotation::ROTATION_180.swaps_axes());
        assert_eq!(Rotation::ROTATION_270.to_string(), "270°");
    }

    #[test]
    fn test_unchanged_value_does_not_notify() {
        let tracker = RotationTracker::new();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        tracker.add_listener(move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(tracker.set_rotation(Rotation::ROTATION_0), None);
        assert_eq!(*calls.lock().unwrap(), 0);

        assert_eq!(tracker.set_rotation(rotation(1)), Some(rotation(0)));
        assert_eq!(tracker.set_rotation(rotation(1)), None);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_listeners_receive_new_and_previous_in_order() {
        let tracker = RotationTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            tracker.add_listener(move |new, previous| {
                seen.lock()
                    .unwrap()
                    .push((name, new.quarter_turns(), previous.quarter_turns()));
                Ok(())
            });
        }

        tracker.set_rotation(rotation(3));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 3, 0), ("second", 3, 0), ("third", 3, 0)]
        );
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let tracker = RotationTracker::new();
        let reached = Arc::new(Mutex::new(Vec::new()));

        tracker.add_listener(|_, _| Err(ListenerError("boom".into())));
        tracker.add_listener(|_, _| panic!("listener panic"));
        let tail = reached.clone();
        tracker.add_listener(move |new, _| {
            tail.lock().unwrap().push(new.quarter_turns());
            Ok(())
        });

        tracker.set_rotation(rotation(2));
        assert_eq!(*reached.lock().unwrap(), vec![2]);
        assert_eq!(tracker.rotation(), rotation(2));
    }

    #[test]
    fn test_remove_listener_by_id() {
        let tracker = RotationTracker::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let a = calls.clone();
        let first = tracker.add_listener(move |_, _| {
            a.lock().unwrap().push("a");
            Ok(())
        });
        let b = calls.clone();
        tracker.add_listener(move |_, _| {
            b.lock().unwrap().push("b");
            Ok(())
        });

        assert!(tracker.remove_listener(first));
        assert!(!tracker.remove_listener(first));
        tracker.set_rotation(rotation(1));
        assert_eq!(*calls.lock().unwrap(), vec!["b"]);

        tracker.clear_listeners();
        assert_eq!(tracker.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_modify_list_during_notify() {
        let tracker = Arc::new(RotationTracker::new());
        let calls = Arc::new(Mutex::new(0));

        let inner_tracker = tracker.clone();
        let counter = calls.clone();
        tracker.add_listener(move |_, _| {
            let counter = counter.clone();
            inner_tracker.add_listener(move |_, _| {
                *counter.lock().unwrap() += 1;
                Ok(())
            });
            Ok(())
        });

        tracker.set_rotation(rotation(1));
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(tracker.listener_count(), 2);

        // drop the Arc cycle
        tracker.clear_listeners();
    }
}
