//! Reactive proxies over keyed collections (maps and sets).
//!
//! Collection mutation happens through methods, so the traps here are
//! method shims: reads track the key or an iteration sentinel, writes
//! resolve add-vs-set by pre-existence and trigger accordingly. Keys are
//! canonicalized (see [`MapKey`](crate::MapKey)), so an entry is found
//! whether it is looked up with a raw or a reactive key.

use crate::dep::{DepKey, TrackOp, TriggerOp};
use crate::reactive::{to_raw, Reactive};
use crate::value::{same_value, MapKey, RawData, Value};

impl Reactive {
    fn with_map<T>(&self, f: impl FnOnce(&indexmap::IndexMap<MapKey, Value>) -> T) -> T {
        match &*self.obj.0.data.borrow() {
            RawData::Map(map) => f(map),
            _ => panic!("expected a map target"),
        }
    }

    fn with_map_mut<T>(
        &self,
        f: impl FnOnce(&mut indexmap::IndexMap<MapKey, Value>) -> T,
    ) -> T {
        match &mut *self.obj.0.data.borrow_mut() {
            RawData::Map(map) => f(map),
            _ => panic!("expected a map target"),
        }
    }

    fn with_set<T>(&self, f: impl FnOnce(&indexmap::IndexSet<MapKey>) -> T) -> T {
        match &*self.obj.0.data.borrow() {
            RawData::Set(set) => f(set),
            _ => panic!("expected a set target"),
        }
    }

    fn with_set_mut<T>(&self, f: impl FnOnce(&mut indexmap::IndexSet<MapKey>) -> T) -> T {
        match &mut *self.obj.0.data.borrow_mut() {
            RawData::Set(set) => f(set),
            _ => panic!("expected a set target"),
        }
    }

    // --- map shims ---

    /// Reads the entry for `key`, tracking that key. Missing entries read
    /// as `Unit`.
    pub fn map_get(&self, key: impl Into<Value>) -> Value {
        let key = MapKey::new(key.into());
        let value = self.with_map(|map| map.get(&key).cloned());
        self.track_key(TrackOp::Get, DepKey::Key(key));
        self.wrap(value.unwrap_or_default())
    }

    /// Whether the map has an entry for `key`.
    pub fn map_has(&self, key: impl Into<Value>) -> bool {
        let key = MapKey::new(key.into());
        let found = self.with_map(|map| map.contains_key(&key));
        self.track_key(TrackOp::Has, DepKey::Key(key));
        found
    }

    /// The number of entries. Tracks iteration.
    pub fn map_size(&self) -> usize {
        let len = self.with_map(|map| map.len());
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        len
    }

    /// Writes an entry, distinguishing add from set by pre-existence and
    /// triggering only on an actual (NaN-aware) change.
    pub fn map_set(&self, key: impl Into<Value>, value: impl Into<Value>) {
        if self.refuse_write("set") {
            return;
        }
        let key = MapKey::new(key.into());
        let mut value = value.into();
        if !self.shallow {
            value = to_raw(value);
        }
        let old = self.with_map_mut(|map| map.insert(key.clone(), value.clone()));
        match old {
            None => self.trigger_key(TriggerOp::Add, Some(DepKey::Key(key)), None),
            Some(old) if !same_value(&old, &value) => {
                self.trigger_key(TriggerOp::Set, Some(DepKey::Key(key)), None)
            }
            Some(_) => {}
        }
    }

    /// Removes the entry for `key`. Returns whether it existed. Refused
    /// with a warning on readonly handles.
    pub fn map_delete(&self, key: impl Into<Value>) -> bool {
        if self.refuse_write("delete") {
            return false;
        }
        let key = MapKey::new(key.into());
        let removed = self.with_map_mut(|map| map.shift_remove(&key));
        match removed {
            Some(_) => {
                self.trigger_key(TriggerOp::Delete, Some(DepKey::Key(key)), None);
                true
            }
            None => false,
        }
    }

    /// Removes every entry, notifying every dep of the target.
    pub fn map_clear(&self) {
        if self.refuse_write("clear") {
            return;
        }
        let was_empty = self.with_map_mut(|map| {
            let was_empty = map.is_empty();
            map.clear();
            was_empty
        });
        if !was_empty {
            self.trigger_key(TriggerOp::Clear, None, None);
        }
    }

    /// The map's keys in insertion order, wrapped per flavor. Tracks key
    /// iteration, which `set` of an existing key does not disturb.
    pub fn map_keys(&self) -> Vec<Value> {
        let keys: Vec<Value> = self.with_map(|map| map.keys().map(|k| k.value().clone()).collect());
        self.track_key(TrackOp::Iterate, DepKey::MapKeyIterate);
        keys.into_iter().map(|k| self.wrap(k)).collect()
    }

    /// The map's values in insertion order, wrapped per flavor.
    pub fn map_values(&self) -> Vec<Value> {
        let values: Vec<Value> = self.with_map(|map| map.values().cloned().collect());
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        values.into_iter().map(|v| self.wrap(v)).collect()
    }

    /// The map's entries in insertion order, keys and values wrapped per
    /// flavor.
    pub fn map_entries(&self) -> Vec<(Value, Value)> {
        let entries: Vec<(Value, Value)> = self.with_map(|map| {
            map.iter()
                .map(|(k, v)| (k.value().clone(), v.clone()))
                .collect()
        });
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        entries
            .into_iter()
            .map(|(k, v)| (self.wrap(k), self.wrap(v)))
            .collect()
    }

    /// Calls `f` for every entry as `(value, key)`, both wrapped per
    /// flavor. The snapshot is taken before the first call, so `f` may
    /// mutate the map.
    pub fn map_for_each(&self, mut f: impl FnMut(Value, Value)) {
        for (key, value) in self.map_entries() {
            f(value, key);
        }
    }

    // --- set shims ---

    /// Whether the set contains `value`.
    pub fn set_has(&self, value: impl Into<Value>) -> bool {
        let key = MapKey::new(value.into());
        let found = self.with_set(|set| set.contains(&key));
        self.track_key(TrackOp::Has, DepKey::Key(key));
        found
    }

    /// The number of elements. Tracks iteration.
    pub fn set_size(&self) -> usize {
        let len = self.with_set(|set| set.len());
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        len
    }

    /// Adds an element; triggers only when it was absent.
    pub fn set_add(&self, value: impl Into<Value>) {
        if self.refuse_write("add") {
            return;
        }
        let mut value = value.into();
        if !self.shallow {
            value = to_raw(value);
        }
        let key = MapKey::new(value);
        let inserted = self.with_set_mut(|set| set.insert(key.clone()));
        if inserted {
            self.trigger_key(TriggerOp::Add, Some(DepKey::Key(key)), None);
        }
    }

    /// Removes an element. Returns whether it was present.
    pub fn set_delete(&self, value: impl Into<Value>) -> bool {
        if self.refuse_write("delete") {
            return false;
        }
        let key = MapKey::new(value.into());
        let removed = self.with_set_mut(|set| set.shift_remove(&key));
        if removed {
            self.trigger_key(TriggerOp::Delete, Some(DepKey::Key(key)), None);
        }
        removed
    }

    /// Removes every element, notifying every dep of the target.
    pub fn set_clear(&self) {
        if self.refuse_write("clear") {
            return;
        }
        let was_empty = self.with_set_mut(|set| {
            let was_empty = set.is_empty();
            set.clear();
            was_empty
        });
        if !was_empty {
            self.trigger_key(TriggerOp::Clear, None, None);
        }
    }

    /// The set's elements in insertion order, wrapped per flavor.
    pub fn set_values(&self) -> Vec<Value> {
        let values: Vec<Value> =
            self.with_set(|set| set.iter().map(|k| k.value().clone()).collect());
        self.track_key(TrackOp::Iterate, DepKey::Iterate);
        values.into_iter().map(|v| self.wrap(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::*;

    #[test]
    fn per_key_tracking() {
        let m = create_reactive(Obj::map([("a", 1), ("b", 2)])).into_reactive();
        let runs = Rc::new(Cell::new(0));
        create_effect({
            let (m, runs) = (m.clone(), runs.clone());
            move || {
                m.map_get("a");
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);
        m.map_set("b", 20); // different key
        assert_eq!(runs.get(), 1);
        m.map_set("a", 10);
        assert_eq!(runs.get(), 2);
        m.map_set("a", 10); // unchanged value
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn size_reacts_to_structure_only() {
        let m = create_reactive(Obj::map([("a", 1)])).into_reactive();
        let sizes: Rc<std::cell::RefCell<Vec<usize>>> = Rc::default();
        create_effect({
            let (m, sizes) = (m.clone(), sizes.clone());
            move || sizes.borrow_mut().push(m.map_size())
        });
        assert_eq!(*sizes.borrow(), vec![1]);
        m.map_set("b", 2);
        assert_eq!(*sizes.borrow(), vec![1, 2]);
        m.map_delete("a");
        assert_eq!(*sizes.borrow(), vec![1, 2, 1]);
    }

    #[test]
    fn value_sets_notify_entry_iteration_but_not_key_iteration() {
        let m = create_reactive(Obj::map([("a", 1)])).into_reactive();
        let entry_runs = Rc::new(Cell::new(0));
        let key_runs = Rc::new(Cell::new(0));
        create_effect({
            let (m, entry_runs) = (m.clone(), entry_runs.clone());
            move || {
                m.map_values();
                entry_runs.set(entry_runs.get() + 1);
            }
        });
        create_effect({
            let (m, key_runs) = (m.clone(), key_runs.clone());
            move || {
                m.map_keys();
                key_runs.set(key_runs.get() + 1);
            }
        });
        assert_eq!((entry_runs.get(), key_runs.get()), (1, 1));
        // SET of an existing key changes values but not the key set.
        m.map_set("a", 2);
        assert_eq!((entry_runs.get(), key_runs.get()), (2, 1));
        // ADD changes both.
        m.map_set("b", 3);
        assert_eq!((entry_runs.get(), key_runs.get()), (3, 2));
    }

    #[test]
    fn clear_notifies_every_observer() {
        let m = create_reactive(Obj::map([("a", 1), ("b", 2)])).into_reactive();
        let a_runs = Rc::new(Cell::new(0));
        let size_runs = Rc::new(Cell::new(0));
        create_effect({
            let (m, a_runs) = (m.clone(), a_runs.clone());
            move || {
                m.map_get("a");
                a_runs.set(a_runs.get() + 1);
            }
        });
        create_effect({
            let (m, size_runs) = (m.clone(), size_runs.clone());
            move || {
                m.map_size();
                size_runs.set(size_runs.get() + 1);
            }
        });
        m.map_clear();
        assert_eq!((a_runs.get(), size_runs.get()), (2, 2));
        // Clearing an empty map is a no-op.
        m.map_clear();
        assert_eq!((a_runs.get(), size_runs.get()), (2, 2));
    }

    #[test]
    fn reactive_and_raw_keys_hit_the_same_entry() {
        let key_obj = Obj::record([("id", 1)]);
        let m = create_reactive(Obj::map([(Value::Obj(key_obj.clone()), Value::Int(10))]))
            .into_reactive();
        let wrapped_key = create_reactive(key_obj.clone());
        assert_eq!(m.map_get(wrapped_key.clone()).as_int(), Some(10));
        assert_eq!(m.map_get(key_obj).as_int(), Some(10));
        assert!(m.map_has(wrapped_key));
    }

    #[test]
    fn deep_map_wraps_yielded_values() {
        let m = create_reactive(Obj::map([("child", Obj::record([("x", 1)]))]))
            .into_reactive();
        assert!(is_reactive(&m.map_get("child")));
        for (_k, v) in m.map_entries() {
            assert!(is_reactive(&v));
        }
        let shallow = create_shallow_reactive(m.raw()).into_reactive();
        assert!(!is_proxy(&shallow.map_get("child")));
    }

    #[test]
    fn readonly_map_refuses_writes() {
        let m = create_readonly(Obj::map([("a", 1)])).into_reactive();
        m.map_set("a", 2);
        assert!(!m.map_delete("a"));
        m.map_clear();
        assert_eq!(m.map_get("a").as_int(), Some(1));
    }

    #[test]
    fn set_membership_tracking() {
        let s = create_reactive(Obj::set([1, 2])).into_reactive();
        let seen = Rc::new(Cell::new(false));
        create_effect({
            let (s, seen) = (s.clone(), seen.clone());
            move || seen.set(s.set_has(3))
        });
        assert!(!seen.get());
        s.set_add(3);
        assert!(seen.get());
        s.set_delete(3);
        assert!(!seen.get());
        // Re-adding an existing element does not trigger.
        let sizes = Rc::new(Cell::new(0));
        create_effect({
            let (s, sizes) = (s.clone(), sizes.clone());
            move || {
                s.set_size();
                sizes.set(sizes.get() + 1);
            }
        });
        s.set_add(1);
        assert_eq!(sizes.get(), 1);
    }

    #[test]
    fn nan_keys_are_usable() {
        let m = create_reactive(Obj::map([(f64::NAN, 1)])).into_reactive();
        assert_eq!(m.map_get(f64::NAN).as_int(), Some(1));
        m.map_set(f64::NAN, 1); // same value, NaN-aware: no change
        assert_eq!(m.map_size(), 1);
    }
}
