use std::rc::Rc;

use catalog_utils::EntityKey;
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle returned by `subscribe`, used to unsubscribe.
    pub struct ListenerKey;
}

type Callback<T> = Rc<dyn Fn(&T)>;

/// Per-entity change callbacks.
pub(crate) struct Listeners<T> {
    listeners: SlotMap<ListenerKey, (EntityKey, Callback<T>)>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            listeners: SlotMap::with_key(),
        }
    }
}

impl<T> Listeners<T> {
    pub(crate) fn register(
        &mut self,
        key: EntityKey,
        callback: impl Fn(&T) + 'static,
    ) -> ListenerKey {
        self.listeners.insert((key, Rc::new(callback)))
    }

    pub(crate) fn unregister(&mut self, listener: ListenerKey) -> bool {
        self.listeners.remove(listener).is_some()
    }

    pub(crate) fn release(&mut self, key: &EntityKey) {
        self.listeners.retain(|_, (listening_to, _)| listening_to != key);
    }

    /// Callbacks for `key`, collected so the caller can drop its borrow before running them.
    /// Callbacks are free to call back into the store.
    pub(crate) fn for_key(&self, key: &EntityKey) -> Vec<Callback<T>> {
        self.listeners
            .values()
            .filter(|(listening_to, _)| listening_to == key)
            .map(|(_, callback)| Rc::clone(callback))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}
