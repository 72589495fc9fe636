use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Objects that own GPU memory and can release it explicitly.
pub trait Destroy {
    fn destroy(&self);
}

impl<T: Destroy + ?Sized> Destroy for Rc<T> {
    fn destroy(&self) {
        (**self).destroy()
    }
}

struct Entry<T: ?Sized> {
    object: Rc<T>,
    count: usize,
}

/// Reference counts shared objects by identity and destroys them when the
/// last user lets go.
///
/// Handles are cheap to clone; clones observe the same counts.
pub struct RefCountedCache<T: Destroy + ?Sized> {
    entries: Rc<RefCell<HashMap<usize, Entry<T>>>>,
}

impl<T: Destroy + ?Sized> Clone for RefCountedCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Rc::clone(&self.entries),
        }
    }
}

impl<T: Destroy + ?Sized> Default for RefCountedCache<T> {
    fn default() -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

fn identity<T: ?Sized>(object: &Rc<T>) -> usize {
    Rc::as_ptr(object) as *const () as usize
}

impl<T: Destroy + ?Sized> RefCountedCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_ref(&self, object: &Rc<T>) {
        let mut entries = self.entries.borrow_mut();
        entries
            .entry(identity(object))
            .and_modify(|entry| entry.count += 1)
            .or_insert_with(|| Entry {
                object: Rc::clone(object),
                count: 1,
            });
    }

    /// Drops one reference. The object is destroyed and forgotten when the
    /// count reaches zero; untracked objects are ignored.
    pub fn dec_ref(&self, object: &Rc<T>) {
        let key = identity(object);
        let released = {
            let mut entries = self.entries.borrow_mut();
            let Some(entry) = entries.get_mut(&key) else {
                tracing::warn!("dec_ref on an object the cache does not track; ignoring");
                return;
            };
            entry.count -= 1;
            if entry.count == 0 {
                entries.remove(&key).map(|entry| entry.object)
            } else {
                None
            }
        };

        if let Some(object) = released {
            object.destroy();
        }
    }

    /// Takes a reference that is released when the guard drops.
    pub fn acquire(&self, object: &Rc<T>) -> RefGuard<T> {
        self.inc_ref(object);
        RefGuard {
            cache: self.clone(),
            object: Rc::clone(object),
        }
    }

    pub fn ref_count(&self, object: &Rc<T>) -> usize {
        self.entries
            .borrow()
            .get(&identity(object))
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Destroys every tracked object regardless of its count.
    pub fn destroy(&self) {
        let drained: Vec<Rc<T>> = self
            .entries
            .borrow_mut()
            .drain()
            .map(|(_, entry)| entry.object)
            .collect();
        for object in drained {
            object.destroy();
        }
    }
}

impl<T: Destroy + ?Sized> fmt::Debug for RefCountedCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// Scoped reference taken with [`RefCountedCache::acquire`].
pub struct RefGuard<T: Destroy + ?Sized> {
    cache: RefCountedCache<T>,
    object: Rc<T>,
}

impl<T: Destroy + ?Sized> RefGuard<T> {
    pub fn object(&self) -> &Rc<T> {
        &self.object
    }
}

impl<T: Destroy + ?Sized> std::ops::Deref for RefGuard<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T: Destroy + ?Sized> Drop for RefGuard<T> {
    fn drop(&mut self) {
        self.cache.dec_ref(&self.object);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct Counted {
        destroyed: Cell<u32>,
    }

    impl Destroy for Counted {
        fn destroy(&self) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    #[test]
    fn balanced_refs_destroy_exactly_once() {
        let cache = RefCountedCache::new();
        let object = Rc::new(Counted::default());

        for _ in 0..3 {
            cache.inc_ref(&object);
        }
        assert_eq!(cache.ref_count(&object), 3);

        cache.dec_ref(&object);
        cache.dec_ref(&object);
        assert_eq!(object.destroyed.get(), 0);

        cache.dec_ref(&object);
        assert_eq!(object.destroyed.get(), 1);
        assert!(cache.is_empty());

        cache.dec_ref(&object);
        assert_eq!(object.destroyed.get(), 1);
    }

    #[test]
    fn dec_ref_on_untracked_object_is_ignored() {
        let cache = RefCountedCache::new();
        let object = Rc::new(Counted::default());
        cache.dec_ref(&object);
        assert_eq!(object.destroyed.get(), 0);
        assert_eq!(cache.ref_count(&object), 0);
    }

    #[test]
    fn objects_are_keyed_by_identity() {
        let cache = RefCountedCache::new();
        let a = Rc::new(Counted::default());
        let b = Rc::new(Counted::default());
        cache.inc_ref(&a);
        cache.inc_ref(&b);
        assert_eq!(cache.len(), 2);

        cache.dec_ref(&a);
        assert_eq!(a.destroyed.get(), 1);
        assert_eq!(b.destroyed.get(), 0);
    }

    #[test]
    fn destroy_releases_everything() {
        let cache = RefCountedCache::new();
        let a = Rc::new(Counted::default());
        let b = Rc::new(Counted::default());
        cache.inc_ref(&a);
        cache.inc_ref(&a);
        cache.inc_ref(&b);

        cache.destroy();
        assert_eq!(a.destroyed.get(), 1);
        assert_eq!(b.destroyed.get(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn guard_releases_on_drop() {
        let cache = RefCountedCache::new();
        let object = Rc::new(Counted::default());
        {
            let _first = cache.acquire(&object);
            let second = cache.acquire(&object);
            assert_eq!(cache.ref_count(&object), 2);
            assert_eq!(second.destroyed.get(), 0);
        }
        assert_eq!(object.destroyed.get(), 1);
        assert!(cache.is_empty());
    }
}
