use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::device::{DeviceEventKind, DeviceId, GraphicsDevice, ListenerId};
use crate::error::Result;

use super::Destroy;

/// Value stored in a [`DeviceCache`].
///
/// `destroy` runs when the owning device is destroyed; `lose_context` runs
/// when the device reports loss and the entry should drop native state it
/// cannot restore on its own.
pub trait DeviceCacheEntry: Destroy {
    fn lose_context(&self) {}
}

struct Slot<T> {
    value: Rc<T>,
    listeners: Vec<ListenerId>,
}

type Entries<T> = Rc<RefCell<HashMap<DeviceId, Slot<T>>>>;

/// Side table of one shared value per live device.
///
/// Entries are created on first [`get`](Self::get) and removed when the device
/// fires its destroy event, so a destroyed device never hands back stale
/// resources.
pub struct DeviceCache<T: DeviceCacheEntry + 'static> {
    entries: Entries<T>,
}

impl<T: DeviceCacheEntry + 'static> Default for DeviceCache<T> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<T: DeviceCacheEntry + 'static> DeviceCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `device`, building it with `create` the first time.
    pub fn get<F>(&self, device: &GraphicsDevice, create: F) -> Result<Rc<T>>
    where
        F: FnOnce(&GraphicsDevice) -> Result<T>,
    {
        let id = device.id();
        if let Some(existing) = self.entries.borrow().get(&id) {
            return Ok(Rc::clone(&existing.value));
        }

        device.ensure_usable()?;
        let entry = Rc::new(create(device)?);
        let listeners = self.watch(device);
        self.entries.borrow_mut().insert(
            id,
            Slot {
                value: Rc::clone(&entry),
                listeners,
            },
        );
        Ok(entry)
    }

    pub fn contains(&self, device: &GraphicsDevice) -> bool {
        self.entries.borrow().contains_key(&device.id())
    }

    /// Destroys and forgets the entry for `device`, if any, and detaches
    /// its device listeners.
    pub fn remove(&self, device: &GraphicsDevice) {
        if let Some(listeners) = Self::evict(&self.entries, device.id()) {
            for listener in listeners {
                device.events().off(listener);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn watch(&self, device: &GraphicsDevice) -> Vec<ListenerId> {
        let id = device.id();

        // The device drops its own listeners once destroyed.
        let weak: Weak<RefCell<HashMap<DeviceId, Slot<T>>>> = Rc::downgrade(&self.entries);
        let destroy = device.events().once(DeviceEventKind::Destroy, move |_| {
            if let Some(entries) = weak.upgrade() {
                Self::evict(&entries, id);
            }
        });

        let weak: Weak<RefCell<HashMap<DeviceId, Slot<T>>>> = Rc::downgrade(&self.entries);
        let lost = device.events().on(DeviceEventKind::Lost, move |_| {
            let entry = weak
                .upgrade()
                .and_then(|entries| entries.borrow().get(&id).map(|slot| Rc::clone(&slot.value)));
            if let Some(entry) = entry {
                entry.lose_context();
            }
        });
        vec![destroy, lost]
    }

    fn evict(entries: &Entries<T>, id: DeviceId) -> Option<Vec<ListenerId>> {
        let removed = entries.borrow_mut().remove(&id)?;
        tracing::debug!(device = %id, "releasing per-device cache entry");
        removed.value.destroy();
        Some(removed.listeners)
    }
}

impl<T: DeviceCacheEntry + 'static> fmt::Debug for DeviceCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCache")
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::device::{Canvas, NullBackend, NullOptions};

    #[derive(Default)]
    struct Tracked {
        destroyed: Cell<u32>,
        lost: Cell<u32>,
    }

    impl Destroy for Tracked {
        fn destroy(&self) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    impl DeviceCacheEntry for Tracked {
        fn lose_context(&self) {
            self.lost.set(self.lost.get() + 1);
        }
    }

    fn device() -> GraphicsDevice {
        GraphicsDevice::with_backend(
            Box::new(NullBackend::new(NullOptions::default())),
            Canvas::new(64, 64),
            Default::default(),
        )
    }

    #[test]
    fn one_entry_per_live_device() {
        let cache = DeviceCache::<Tracked>::new();
        let device = device();
        let built = Cell::new(0);

        let first = cache
            .get(&device, |_| {
                built.set(built.get() + 1);
                Ok(Tracked::default())
            })
            .unwrap();
        let second = cache
            .get(&device, |_| {
                built.set(built.get() + 1);
                Ok(Tracked::default())
            })
            .unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(built.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn destroying_the_device_evicts_its_entry() {
        let cache = DeviceCache::<Tracked>::new();
        let device = device();
        let other = self::device();

        let entry = cache.get(&device, |_| Ok(Tracked::default())).unwrap();
        let kept = cache.get(&other, |_| Ok(Tracked::default())).unwrap();
        assert_eq!(cache.len(), 2);

        device.destroy();
        assert_eq!(entry.destroyed.get(), 1);
        assert!(!cache.contains(&device));
        assert_eq!(kept.destroyed.get(), 0);

        device.destroy();
        assert_eq!(entry.destroyed.get(), 1);

        assert!(cache.get(&device, |_| Ok(Tracked::default())).is_err());
    }

    #[test]
    fn device_loss_reaches_live_entries() {
        let cache = DeviceCache::<Tracked>::new();
        let device = device();
        let entry = cache.get(&device, |_| Ok(Tracked::default())).unwrap();

        device.handle_device_lost();
        assert_eq!(entry.lost.get(), 1);
        assert_eq!(entry.destroyed.get(), 0);
    }

    #[test]
    fn removing_an_entry_detaches_its_listeners() {
        let cache = DeviceCache::<Tracked>::new();
        let device = device();
        let destroy_before = device.events().listener_count(DeviceEventKind::Destroy);
        let lost_before = device.events().listener_count(DeviceEventKind::Lost);

        for _ in 0..3 {
            let entry = cache.get(&device, |_| Ok(Tracked::default())).unwrap();
            cache.remove(&device);
            assert_eq!(entry.destroyed.get(), 1);
        }
        assert_eq!(
            device.events().listener_count(DeviceEventKind::Destroy),
            destroy_before
        );
        assert_eq!(
            device.events().listener_count(DeviceEventKind::Lost),
            lost_before
        );

        let entry = cache.get(&device, |_| Ok(Tracked::default())).unwrap();
        device.handle_device_lost();
        assert_eq!(entry.lost.get(), 1);
    }
}
