//! Build-time registration of state variants.
//!
//! A machine type registers its states once, before first use, by building a
//! [`StateGraph`] from [`StateDef`]s. Variant definitions are immutable and
//! shared across every entity of the machine type; no per-entity variant
//! state exists, only behavior.
//!
//! Shared behavior (a `reboot` handler every device state accepts, the
//! `close`/`expire` pair on request states) is expressed as a
//! [`HandlerSet`] that a variant explicitly includes at registration time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::machine::Ctx;

/// An event handler registered on a state variant.
pub type EventHandler<M> = Arc<dyn Fn(&mut Ctx<'_, M>, &Value) -> Result<()> + Send + Sync>;

/// An entry/exit/timeout hook registered on a state variant.
pub type Hook<M> = Arc<dyn Fn(&mut Ctx<'_, M>) -> Result<()> + Send + Sync>;

/// The behavior bundle for one named state.
pub struct StateDef<M> {
    name: &'static str,
    timeout: Option<Duration>,
    on_entry: Option<Hook<M>>,
    on_exit: Option<Hook<M>>,
    on_timeout: Option<Hook<M>>,
    events: HashMap<&'static str, EventHandler<M>>,
}

impl<M> StateDef<M> {
    /// Start defining a state variant.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            timeout: None,
            on_entry: None,
            on_exit: None,
            on_timeout: None,
            events: HashMap::new(),
        }
    }

    /// Declare the state's timeout duration. Entering the state arms a
    /// deadline of now plus this duration; the timeout handler fires once
    /// the deadline elapses.
    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Hook invoked just after the entity enters this state.
    #[must_use]
    pub fn on_entry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Ctx<'_, M>) -> Result<()> + Send + Sync + 'static,
    {
        self.on_entry = Some(Arc::new(hook));
        self
    }

    /// Hook invoked just before the entity leaves this state.
    #[must_use]
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Ctx<'_, M>) -> Result<()> + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    /// The state's single timeout handler.
    ///
    /// # Panics
    ///
    /// Panics if a timeout handler is already defined; a variant has at
    /// most one.
    #[must_use]
    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut Ctx<'_, M>) -> Result<()> + Send + Sync + 'static,
    {
        assert!(
            self.on_timeout.is_none(),
            "state {:?} already defines a timeout handler",
            self.name
        );
        self.on_timeout = Some(Arc::new(handler));
        self
    }

    /// Register a handler for a named event.
    ///
    /// # Panics
    ///
    /// Panics if the event already has a handler on this state.
    #[must_use]
    pub fn on_event<F>(mut self, event: &'static str, handler: F) -> Self
    where
        F: Fn(&mut Ctx<'_, M>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        let previous = self.events.insert(event, Arc::new(handler));
        assert!(
            previous.is_none(),
            "state {:?} already handles event {:?}",
            self.name,
            event
        );
        self
    }

    /// Merge a shared handler bundle into this state's handler map.
    ///
    /// # Panics
    ///
    /// Panics if the bundle collides with an already-registered event.
    #[must_use]
    pub fn include(mut self, set: &HandlerSet<M>) -> Self {
        for (event, handler) in &set.events {
            let previous = self.events.insert(event, Arc::clone(handler));
            assert!(
                previous.is_none(),
                "state {:?} already handles event {:?} (from handler set {:?})",
                self.name,
                event,
                set.name
            );
        }
        self
    }

    /// The variant's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The declared timeout duration, if any.
    #[must_use]
    pub const fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn entry_hook(&self) -> Option<Hook<M>> {
        self.on_entry.clone()
    }

    pub(crate) fn exit_hook(&self) -> Option<Hook<M>> {
        self.on_exit.clone()
    }

    pub(crate) fn timeout_handler(&self) -> Option<Hook<M>> {
        self.on_timeout.clone()
    }

    pub(crate) fn handler(&self, event: &str) -> Option<EventHandler<M>> {
        self.events.get(event).cloned()
    }
}

/// A named, reusable bundle of event handlers shared across state variants.
pub struct HandlerSet<M> {
    name: &'static str,
    events: HashMap<&'static str, EventHandler<M>>,
}

impl<M> HandlerSet<M> {
    /// Start building a handler bundle.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            events: HashMap::new(),
        }
    }

    /// Add a handler to the bundle.
    ///
    /// # Panics
    ///
    /// Panics if the event is already in the bundle.
    #[must_use]
    pub fn on_event<F>(mut self, event: &'static str, handler: F) -> Self
    where
        F: Fn(&mut Ctx<'_, M>, &Value) -> Result<()> + Send + Sync + 'static,
    {
        let previous = self.events.insert(event, Arc::new(handler));
        assert!(
            previous.is_none(),
            "handler set {:?} already contains event {:?}",
            self.name,
            event
        );
        self
    }
}

/// The default name of the fallback variant for unrecognized state tags.
pub const UNKNOWN_STATE: &str = "unknown";

/// The registered state variants of one machine type.
pub struct StateGraph<M> {
    states: HashMap<&'static str, Arc<StateDef<M>>>,
    unknown: &'static str,
}

impl<M> StateGraph<M> {
    /// Start building a graph.
    #[must_use]
    pub fn builder() -> StateGraphBuilder<M> {
        StateGraphBuilder {
            states: HashMap::new(),
            unknown: UNKNOWN_STATE,
        }
    }

    /// Look up a variant by exact name.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Arc<StateDef<M>>> {
        self.states.get(name)
    }

    /// Look up a variant, falling back to the designated unknown variant
    /// for unrecognized persisted state tags.
    pub(crate) fn variant(&self, name: &str) -> &Arc<StateDef<M>> {
        self.states.get(name).unwrap_or_else(|| {
            tracing::warn!(state = name, "unrecognized state tag; using fallback variant");
            &self.states[self.unknown]
        })
    }

    /// Names of every registered state.
    #[must_use]
    pub fn state_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.states.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Builder for a [`StateGraph`].
pub struct StateGraphBuilder<M> {
    states: HashMap<&'static str, Arc<StateDef<M>>>,
    unknown: &'static str,
}

impl<M> StateGraphBuilder<M> {
    /// Register a state variant.
    ///
    /// # Panics
    ///
    /// Panics if a variant with the same name is already registered.
    #[must_use]
    pub fn state(mut self, def: StateDef<M>) -> Self {
        let name = def.name();
        let previous = self.states.insert(name, Arc::new(def));
        assert!(previous.is_none(), "state {name:?} registered twice");
        self
    }

    /// Override the fallback variant name (default `"unknown"`).
    #[must_use]
    pub fn unknown_state(mut self, name: &'static str) -> Self {
        self.unknown = name;
        self
    }

    /// Finish the graph.
    ///
    /// # Panics
    ///
    /// Panics if the designated unknown variant was never registered.
    #[must_use]
    pub fn build(self) -> StateGraph<M> {
        assert!(
            self.states.contains_key(self.unknown),
            "fallback state {:?} is not registered",
            self.unknown
        );
        StateGraph {
            states: self.states,
            unknown: self.unknown,
        }
    }
}
