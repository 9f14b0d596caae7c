use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use catalog_utils::EntityKey;

/// The set of entities with a mutation in flight.
#[derive(Clone, Default)]
pub struct Tickets {
    held: Rc<RefCell<HashSet<EntityKey>>>,
}

impl Tickets {
    /// `None` if a ticket for `key` is already out.
    pub fn acquire(&self, key: &EntityKey) -> Option<MutationTicket> {
        if !self.held.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(MutationTicket {
            key: key.clone(),
            held: Rc::clone(&self.held),
        })
    }

    pub fn is_held(&self, key: &EntityKey) -> bool {
        self.held.borrow().contains(key)
    }
}

/// Marks a mutation in flight for one entity until it is dropped, whichever way the
/// mutation ends.
#[derive(Debug)]
pub struct MutationTicket {
    key: EntityKey,
    held: Rc<RefCell<HashSet<EntityKey>>>,
}

impl MutationTicket {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Drop for MutationTicket {
    fn drop(&mut self) {
        self.held.borrow_mut().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_ticket_per_key() {
        let tickets = Tickets::default();
        let key = EntityKey::new("tool-1");

        let ticket = tickets.acquire(&key).unwrap();
        assert!(tickets.acquire(&key).is_none());
        assert!(tickets.is_held(&key));

        // other keys are unaffected
        assert!(tickets.acquire(&EntityKey::new("tool-2")).is_some());

        drop(ticket);
        assert!(!tickets.is_held(&key));
        assert!(tickets.acquire(&key).is_some());
    }

    #[test]
    fn test_released_on_early_return() {
        fn remote_call() -> Result<(), &'static str> {
            Err("remote down")
        }

        fn fails_midway(tickets: &Tickets, key: &EntityKey) -> Result<(), &'static str> {
            let _ticket = tickets.acquire(key).ok_or("busy")?;
            remote_call()?;
            Ok(())
        }

        let tickets = Tickets::default();
        let key = EntityKey::new("tool-1");

        assert_eq!(fails_midway(&tickets, &key), Err("remote down"));
        assert!(!tickets.is_held(&key));
    }
}
