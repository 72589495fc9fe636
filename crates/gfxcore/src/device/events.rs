use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// What happened to a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    /// Fired once, synchronously, at the start of `destroy`.
    Destroy,
    /// The native context went away; cached GPU objects are invalid.
    Lost,
    /// The canvas changed size.
    Resize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Destroy,
    Lost,
    Resize { width: u32, height: u32 },
}

impl DeviceEvent {
    pub fn kind(&self) -> DeviceEventKind {
        match self {
            DeviceEvent::Destroy => DeviceEventKind::Destroy,
            DeviceEvent::Lost => DeviceEventKind::Lost,
            DeviceEvent::Resize { .. } => DeviceEventKind::Resize,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Rc<dyn Fn(&DeviceEvent)>;

struct Listener {
    id: ListenerId,
    kind: DeviceEventKind,
    once: bool,
    callback: Callback,
}

/// Listener registry for one device.
///
/// Listeners run synchronously in registration order and may register or
/// remove listeners while running.
#[derive(Default)]
pub struct DeviceEvents {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
}

impl DeviceEvents {
    pub fn on<F>(&self, kind: DeviceEventKind, callback: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + 'static,
    {
        self.register(kind, false, Rc::new(callback))
    }

    /// Registers a listener that is removed after its first call.
    pub fn once<F>(&self, kind: DeviceEventKind, callback: F) -> ListenerId
    where
        F: Fn(&DeviceEvent) + 'static,
    {
        self.register(kind, true, Rc::new(callback))
    }

    /// Removes a listener. Returns `false` when it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        listeners.len() != before
    }

    pub fn fire(&self, event: DeviceEvent) {
        let kind = event.kind();
        let callbacks: Vec<Callback> = {
            let mut listeners = self.listeners.borrow_mut();
            let callbacks = listeners
                .iter()
                .filter(|listener| listener.kind == kind)
                .map(|listener| Rc::clone(&listener.callback))
                .collect();
            listeners.retain(|listener| !(listener.once && listener.kind == kind));
            callbacks
        };
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn listener_count(&self, kind: DeviceEventKind) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }

    /// Drops every listener.
    pub(crate) fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    fn register(&self, kind: DeviceEventKind, once: bool, callback: Callback) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            kind,
            once,
            callback,
        });
        id
    }
}

impl fmt::Debug for DeviceEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceEvents")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_listeners_fire_a_single_time() {
        let events = DeviceEvents::default();
        let hits = Rc::new(Cell::new(0));

        let counter = Rc::clone(&hits);
        events.once(DeviceEventKind::Destroy, move |_| counter.set(counter.get() + 1));
        events.fire(DeviceEvent::Destroy);
        events.fire(DeviceEvent::Destroy);

        assert_eq!(hits.get(), 1);
        assert_eq!(events.listener_count(DeviceEventKind::Destroy), 0);
    }

    #[test]
    fn listeners_only_see_their_kind() {
        let events = DeviceEvents::default();
        let sizes = Rc::new(RefCell::new(Vec::new()));

        let seen = Rc::clone(&sizes);
        let id = events.on(DeviceEventKind::Resize, move |event| {
            if let DeviceEvent::Resize { width, height } = event {
                seen.borrow_mut().push((*width, *height));
            }
        });
        events.fire(DeviceEvent::Lost);
        events.fire(DeviceEvent::Resize {
            width: 320,
            height: 200,
        });
        assert!(events.off(id));
        assert!(!events.off(id));
        events.fire(DeviceEvent::Resize {
            width: 640,
            height: 400,
        });

        assert_eq!(*sizes.borrow(), vec![(320, 200)]);
    }

    #[test]
    fn listeners_may_register_while_firing() {
        let events = Rc::new(DeviceEvents::default());
        let inner = Rc::downgrade(&events);
        events.on(DeviceEventKind::Lost, move |_| {
            if let Some(events) = inner.upgrade() {
                events.on(DeviceEventKind::Destroy, |_| {});
            }
        });
        events.fire(DeviceEvent::Lost);
        assert_eq!(events.listener_count(DeviceEventKind::Destroy), 1);
    }
}
