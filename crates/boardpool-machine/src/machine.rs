//! The generic persistent state machine engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use boardpool_core::LocksByName;
use boardpool_store::StateStore;

use crate::error::{MachineError, Result};
use crate::graph::{StateDef, StateGraph};

/// A state machine over one type of entity (devices or requests).
///
/// The machine holds no per-entity state in memory: every dispatch loads the
/// entity's persisted `(state, timeout, counters)` tuple, runs the matching
/// variant's handler under the entity's lock, and persists whatever the
/// handler changed. `M` is the machine type's shared domain context:
/// whatever its handlers need beyond the engine (hardware facades, extra
/// store views, the event channel).
pub struct StateMachine<M> {
    kind: &'static str,
    graph: StateGraph<M>,
    storage: Arc<dyn StateStore>,
    domain: M,
    locks: LocksByName,
}

impl<M: Send + Sync + 'static> StateMachine<M> {
    /// Create a machine from its registered graph, storage, and domain
    /// context. `kind` tags log output ("device", "request").
    pub fn new(
        kind: &'static str,
        graph: StateGraph<M>,
        storage: Arc<dyn StateStore>,
        domain: M,
    ) -> Self {
        Self {
            kind,
            graph,
            storage,
            domain,
            locks: LocksByName::new(),
        }
    }

    /// The machine type tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// The shared domain context.
    pub const fn domain(&self) -> &M {
        &self.domain
    }

    /// The storage this machine persists through.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StateStore> {
        &self.storage
    }

    /// Deliver an event to an entity.
    ///
    /// Dispatch runs under the entity's lock: concurrent calls for the same
    /// name serialize, distinct names proceed independently. An event the
    /// current variant does not handle is silently ignored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` (via `MachineError::Store`) for unknown entities;
    /// handler failures propagate unchanged.
    pub fn handle_event(&self, name: &str, event: &str, args: &Value) -> Result<()> {
        let _guard = self.locks.lock(name);
        let persisted = self.storage.get_state(name)?;
        let variant = self.graph.variant(&persisted.state);
        let Some(handler) = variant.handler(event) else {
            tracing::debug!(
                kind = self.kind,
                entity = name,
                state = variant.name(),
                event,
                "no handler for event; ignored"
            );
            return Ok(());
        };
        tracing::debug!(
            kind = self.kind,
            entity = name,
            state = variant.name(),
            event,
            "handling event"
        );
        let mut ctx = Ctx {
            machine: self,
            name,
            current: Arc::clone(variant),
        };
        handler(&mut ctx, args)
    }

    /// Deliver a timeout to an entity. A no-op if the current variant has no
    /// timeout handler.
    ///
    /// # Errors
    ///
    /// Same contract as [`StateMachine::handle_event`].
    pub fn handle_timeout(&self, name: &str) -> Result<()> {
        let _guard = self.locks.lock(name);
        let persisted = self.storage.get_state(name)?;
        let variant = self.graph.variant(&persisted.state);
        let Some(handler) = variant.timeout_handler() else {
            tracing::debug!(
                kind = self.kind,
                entity = name,
                state = variant.name(),
                "no timeout handler; ignored"
            );
            return Ok(());
        };
        tracing::debug!(
            kind = self.kind,
            entity = name,
            state = variant.name(),
            "handling timeout"
        );
        let mut ctx = Ctx {
            machine: self,
            name,
            current: Arc::clone(variant),
        };
        handler(&mut ctx)
    }

    /// Transition the entity to `new_state` only if it is currently in
    /// `old_state`. Returns whether the transition happened; being in some
    /// other state is not an error.
    ///
    /// The check and the transition run atomically under the entity lock,
    /// so an external caller cannot race a timeout-driven transition.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown entities, `UnknownState` if
    /// `new_state` was never registered; hook failures propagate.
    pub fn conditional_state_change(
        &self,
        name: &str,
        old_state: &str,
        new_state: &str,
    ) -> Result<bool> {
        let _guard = self.locks.lock(name);
        let persisted = self.storage.get_state(name)?;
        if persisted.state != old_state {
            tracing::info!(
                kind = self.kind,
                entity = name,
                expected = old_state,
                actual = %persisted.state,
                "conditional state change refused"
            );
            return Ok(false);
        }
        let current = Arc::clone(self.graph.variant(&persisted.state));
        let mut ctx = Ctx {
            machine: self,
            name,
            current,
        };
        ctx.goto_state(new_state)?;
        Ok(true)
    }
}

/// Handler context: the engine surface a state handler can touch.
///
/// Exists only while the entity's lock is held.
pub struct Ctx<'m, M> {
    machine: &'m StateMachine<M>,
    name: &'m str,
    current: Arc<StateDef<M>>,
}

impl<M: Send + Sync + 'static> Ctx<'_, M> {
    /// The entity being handled.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// The machine type's shared domain context.
    pub fn domain(&self) -> &M {
        self.machine.domain()
    }

    /// The name of the state currently being executed.
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.current.name()
    }

    /// Transition to another state: runs the current variant's exit hook,
    /// persists the new state with its declared timeout measured from now,
    /// then runs the new variant's entry hook (which may itself transition
    /// further).
    ///
    /// The calling handler must return immediately afterwards; the variant
    /// it was registered on is no longer current.
    ///
    /// # Errors
    ///
    /// Returns `UnknownState` for unregistered targets; storage and hook
    /// failures propagate.
    pub fn goto_state(&mut self, to: &str) -> Result<()> {
        if let Some(exit) = self.current.exit_hook() {
            exit(self)?;
        }
        let target = self
            .machine
            .graph
            .lookup(to)
            .cloned()
            .ok_or_else(|| MachineError::UnknownState {
                machine: self.machine.kind,
                state: to.to_owned(),
            })?;
        let deadline = target.timeout_duration().map(timeout_from_now);
        self.machine
            .storage
            .set_state(self.name, target.name(), deadline)?;
        tracing::info!(
            kind = self.machine.kind,
            entity = self.name,
            from = self.current.name(),
            to = target.name(),
            "state change"
        );
        self.log(&format!("entering state {}", target.name()));
        self.current = target;
        if let Some(entry) = self.current.entry_hook() {
            entry(self)?;
        }
        Ok(())
    }

    /// Add one to the named counter and return the new value.
    ///
    /// Read-modify-write of the persisted counters map; single-process
    /// safety comes from the entity lock held for the whole dispatch.
    ///
    /// # Errors
    ///
    /// Storage failures propagate.
    pub fn increment_counter(&self, key: &str) -> Result<u32> {
        let mut counters = self.machine.storage.get_state(self.name)?.counters;
        let value = counters.get(key).copied().unwrap_or(0) + 1;
        counters.insert(key.to_owned(), value);
        self.machine.storage.set_counters(self.name, &counters)?;
        Ok(value)
    }

    /// Remove the named counter, or all counters when `key` is `None`.
    ///
    /// # Errors
    ///
    /// Storage failures propagate.
    pub fn clear_counter(&self, key: Option<&str>) -> Result<()> {
        let mut counters = self.machine.storage.get_state(self.name)?.counters;
        match key {
            Some(key) => {
                counters.remove(key);
            }
            None => counters.clear(),
        }
        self.machine.storage.set_counters(self.name, &counters)?;
        Ok(())
    }

    /// Write a line to the entity's log stream and to the process log.
    ///
    /// Log-sink failures are demoted to warnings; a handler never fails
    /// because logging did.
    pub fn log(&self, message: &str) {
        tracing::info!(kind = self.machine.kind, entity = self.name, "{message}");
        if let Err(error) = self
            .machine
            .storage
            .log_append(self.name, message, "statemachine")
        {
            tracing::warn!(entity = self.name, %error, "could not append to entity log");
        }
    }
}

fn timeout_from_now(duration: std::time::Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use boardpool_store::{MemStore, StateStore};

    use super::*;
    use crate::graph::{HandlerSet, StateDef};

    #[derive(Default)]
    struct TestDomain {
        calls: Mutex<Vec<String>>,
        running: AtomicU32,
        max_overlap: AtomicU32,
    }

    impl TestDomain {
        fn record(&self, what: &str) {
            self.calls.lock().push(what.to_owned());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    fn graph() -> StateGraph<TestDomain> {
        let shared = HandlerSet::new("shared").on_event("shared-poke", |ctx: &mut Ctx<'_, TestDomain>, _| {
            ctx.domain().record("shared-poke");
            Ok(())
        });

        StateGraph::builder()
            .state(
                StateDef::new("state1")
                    .timeout(Duration::from_secs(10))
                    .include(&shared)
                    .on_event("poke", |ctx, _| {
                        ctx.domain().record("poke");
                        Ok(())
                    })
                    .on_event("goto2", |ctx, _| ctx.goto_state("state2"))
                    .on_event("inc", |ctx, _| {
                        ctx.increment_counter("x")?;
                        Ok(())
                    })
                    .on_event("clear", |ctx, _| ctx.clear_counter(Some("x")))
                    .on_event("clear_all", |ctx, _| ctx.clear_counter(None))
                    .on_event("slow", |ctx, _| {
                        let domain = ctx.domain();
                        let now = domain.running.fetch_add(1, Ordering::SeqCst) + 1;
                        domain.max_overlap.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(2));
                        domain.running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .on_timeout(|ctx| {
                        ctx.domain().record("timeout1");
                        Ok(())
                    })
                    .on_exit(|ctx| {
                        ctx.domain().record("exit1");
                        Ok(())
                    }),
            )
            .state(
                StateDef::new("state2")
                    .timeout(Duration::from_secs(20))
                    .include(&shared)
                    .on_entry(|ctx| {
                        ctx.domain().record("enter2");
                        Ok(())
                    }),
            )
            .state(StateDef::new("unknown").on_event("poke", |ctx: &mut Ctx<'_, TestDomain>, _| {
                ctx.domain().record("unknown-poke");
                Ok(())
            }))
            .build()
    }

    fn machine() -> (StateMachine<TestDomain>, MemStore) {
        let store = MemStore::new();
        store.add_device("test", "prod", "srv", None);
        store.devices().set_state("test", "state1", None).unwrap();
        let machine = StateMachine::new(
            "test",
            graph(),
            Arc::new(store.devices()),
            TestDomain::default(),
        );
        (machine, store)
    }

    #[test]
    fn event_dispatches_to_handler() {
        let (machine, _store) = machine();
        machine
            .handle_event("test", "poke", &Value::Null)
            .unwrap();
        assert_eq!(machine.domain().calls(), vec!["poke"]);
    }

    #[test]
    fn unhandled_event_is_ignored() {
        let (machine, _store) = machine();
        machine
            .handle_event("test", "never-heard-of-it", &Value::Null)
            .unwrap();
        assert!(machine.domain().calls().is_empty());
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let (machine, _store) = machine();
        let result = machine.handle_event("missing", "poke", &Value::Null);
        assert!(matches!(result, Err(error) if error.is_not_found()));
    }

    #[test]
    fn timeout_dispatches_to_handler() {
        let (machine, _store) = machine();
        machine.handle_timeout("test").unwrap();
        assert_eq!(machine.domain().calls(), vec!["timeout1"]);
    }

    #[test]
    fn timeout_without_handler_is_noop() {
        let (machine, store) = machine();
        store.devices().set_state("test", "state2", None).unwrap();
        machine.handle_timeout("test").unwrap();
        assert!(machine.domain().calls().is_empty());
    }

    #[test]
    fn transition_runs_hooks_and_persists_timeout() {
        let (machine, store) = machine();
        let before = Utc::now();
        machine
            .handle_event("test", "goto2", &Value::Null)
            .unwrap();

        assert_eq!(machine.domain().calls(), vec!["exit1", "enter2"]);

        let state = store.devices().get_state("test").unwrap();
        assert_eq!(state.state, "state2");
        let deadline = state.timeout.expect("state2 declares a timeout");
        let armed_for = (deadline - before).num_seconds();
        assert!((19..=21).contains(&armed_for), "armed for {armed_for}s");
    }

    #[test]
    fn transition_to_unregistered_state_fails() {
        let store = MemStore::new();
        store.add_device("test", "prod", "srv", None);
        store.devices().set_state("test", "state1", None).unwrap();
        let graph = StateGraph::builder()
            .state(StateDef::new("state1").on_event("bad", |ctx, _| ctx.goto_state("nope")))
            .state(StateDef::new("unknown"))
            .build();
        let machine = StateMachine::new(
            "test",
            graph,
            Arc::new(store.devices()),
            TestDomain::default(),
        );

        let result = machine.handle_event("test", "bad", &Value::Null);
        assert!(matches!(
            result,
            Err(MachineError::UnknownState { state, .. }) if state == "nope"
        ));
    }

    #[test]
    fn unrecognized_state_tag_falls_back_to_unknown() {
        let (machine, store) = machine();
        store
            .devices()
            .set_state("test", "who-knows", None)
            .unwrap();
        machine
            .handle_event("test", "poke", &Value::Null)
            .unwrap();
        assert_eq!(machine.domain().calls(), vec!["unknown-poke"]);
    }

    #[test]
    fn shared_handler_set_applies_to_both_states() {
        let (machine, store) = machine();
        machine
            .handle_event("test", "shared-poke", &Value::Null)
            .unwrap();
        store.devices().set_state("test", "state2", None).unwrap();
        machine
            .handle_event("test", "shared-poke", &Value::Null)
            .unwrap();
        assert_eq!(
            machine.domain().calls(),
            vec!["shared-poke", "shared-poke"]
        );
    }

    #[test]
    fn increment_counter_is_monotonic() {
        let (machine, store) = machine();
        machine.handle_event("test", "inc", &Value::Null).unwrap();
        machine.handle_event("test", "inc", &Value::Null).unwrap();
        let counters = store.devices().get_state("test").unwrap().counters;
        assert_eq!(counters.get("x"), Some(&2));
    }

    #[test]
    fn clear_counter_not_set_is_noop() {
        let (machine, store) = machine();
        machine.handle_event("test", "clear", &Value::Null).unwrap();
        let counters = store.devices().get_state("test").unwrap().counters;
        assert!(!counters.contains_key("x"));
    }

    #[test]
    fn clear_counter_removes_only_that_key() {
        let (machine, store) = machine();
        let mut seeded = std::collections::HashMap::new();
        seeded.insert("x".to_string(), 10);
        seeded.insert("y".to_string(), 20);
        store.devices().set_counters("test", &seeded).unwrap();

        machine.handle_event("test", "clear", &Value::Null).unwrap();

        let counters = store.devices().get_state("test").unwrap().counters;
        assert!(!counters.contains_key("x"));
        assert_eq!(counters.get("y"), Some(&20));
    }

    #[test]
    fn clear_all_counters() {
        let (machine, store) = machine();
        let mut seeded = std::collections::HashMap::new();
        seeded.insert("x".to_string(), 10);
        seeded.insert("y".to_string(), 20);
        store.devices().set_counters("test", &seeded).unwrap();

        machine
            .handle_event("test", "clear_all", &Value::Null)
            .unwrap();

        let counters = store.devices().get_state("test").unwrap().counters;
        assert!(counters.is_empty());
    }

    #[test]
    fn conditional_change_commits_only_from_expected_state() {
        let (machine, store) = machine();

        assert!(machine
            .conditional_state_change("test", "state1", "state2")
            .unwrap());
        assert_eq!(store.devices().get_state("test").unwrap().state, "state2");

        // Now in state2; the same call must refuse without erroring.
        assert!(!machine
            .conditional_state_change("test", "state1", "state2")
            .unwrap());
        assert_eq!(store.devices().get_state("test").unwrap().state, "state2");
    }

    #[test]
    fn dispatch_for_one_entity_is_serialized() {
        let (machine, _store) = machine();
        let machine = Arc::new(machine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let machine = Arc::clone(&machine);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        machine.handle_event("test", "slow", &Value::Null).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(machine.domain().max_overlap.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entity_log_receives_transition_lines() {
        let (machine, store) = machine();
        machine
            .handle_event("test", "goto2", &Value::Null)
            .unwrap();
        let lines = store.logs_for("test");
        assert!(lines
            .iter()
            .any(|entry| entry.message == "entering state state2"));
    }
}
