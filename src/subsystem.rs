//! How business modules attach to and detach from the broker.

use std::{future::Future, sync::Arc};

use mallbus_error::{ErrorExt, ListenerError, MallResult, ResultExt, StackError, SubsystemError};
use strum_macros::{Display, IntoStaticStr};
use tracing::{error, info, warn};

use crate::bus::{Broker, EventKind, Listener, ListenerId, Message};

/// A module that talks to the rest of the application only through the
/// broker.
pub trait Subsystem<P: Send + Sync + 'static>: Send {
    fn name(&self) -> &str;

    /// Subscribes every listener the module owns.
    ///
    /// Build the subscriptions in a [`Subscriptions`] and store it only
    /// once everything succeeded; an early return rolls them back.
    fn init(
        &mut self,
        broker: &Broker<P>,
    ) -> Result<(), SubsystemError>;

    /// Background or periodic work. Most modules have none.
    fn start(&mut self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Unsubscribes everything from `init` and releases resources.
    fn shutdown(&mut self) -> Result<(), SubsystemError>;
}

/// Registrations made on behalf of one subsystem.
///
/// Dropping it unregisters whatever it still holds.
pub struct Subscriptions<P: Send + Sync + 'static> {
    broker: Broker<P>,
    entries: Vec<(EventKind, ListenerId)>,
}

impl<P: Send + Sync + 'static> Subscriptions<P> {
    pub fn new(broker: &Broker<P>) -> Self {
        Self {
            broker: broker.clone(),
            entries: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        kind: EventKind,
        listener: Arc<dyn Listener<P>>,
    ) -> ListenerId {
        let id = self.broker.register_listener(kind, listener);
        self.entries.push((kind, id));
        id
    }

    pub fn add_fn<F, Fut>(
        &mut self,
        kind: EventKind,
        f: F,
    ) -> ListenerId
    where
        F: Fn(Arc<Message<P>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        self.add(kind, Arc::new(f))
    }

    pub fn broker(&self) -> &Broker<P> {
        &self.broker
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unregisters everything and returns how many registrations were
    /// still present in the broker.
    pub fn clear(&mut self) -> usize {
        self.entries
            .drain(..)
            .filter(|(kind, id)| self.broker.unregister(*kind, *id))
            .count()
    }
}

impl<P: Send + Sync + 'static> Drop for Subscriptions<P> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            let removed = self.clear();
            warn!(removed, "subscriptions dropped without clear, rolled back");
        }
    }
}

/// Subsystem lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(
        self,
        to: LifecycleState,
    ) -> bool {
        use LifecycleState::*;
        matches!(
            (self, to),
            (Uninitialized, Initialized)
                | (Initialized, Started)
                | (Initialized, Stopped)
                | (Started, Stopped)
        )
    }

    pub fn transition(
        self,
        to: LifecycleState,
        subsystem: &str,
    ) -> Result<LifecycleState, SubsystemError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(SubsystemError::InvalidTransition {
                subsystem: subsystem.to_string(),
                from: self.into(),
                to: to.into(),
            })
        }
    }
}

struct Member<P: Send + Sync + 'static> {
    subsystem: Box<dyn Subsystem<P>>,
    state: LifecycleState,
}

/// Drives a set of subsystems through their lifecycle in order.
pub struct SubsystemHost<P: Send + Sync + 'static> {
    broker: Broker<P>,
    members: Vec<Member<P>>,
}

impl<P: Send + Sync + 'static> SubsystemHost<P> {
    pub fn new(broker: &Broker<P>) -> Self {
        Self {
            broker: broker.clone(),
            members: Vec::new(),
        }
    }

    /// Adds a subsystem; initialisation follows insertion order.
    pub fn add(
        &mut self,
        subsystem: Box<dyn Subsystem<P>>,
    ) -> &mut Self {
        self.members.push(Member {
            subsystem,
            state: LifecycleState::Uninitialized,
        });
        self
    }

    pub fn with(
        mut self,
        subsystem: impl Subsystem<P> + 'static,
    ) -> Self {
        self.add(Box::new(subsystem));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Initialises every subsystem in order.
    ///
    /// On failure the ones already initialised are shut down in reverse
    /// order and the error is returned with the failing subsystem named.
    pub fn init_all(&mut self) -> MallResult<()> {
        for i in 0..self.members.len() {
            let member = &mut self.members[i];
            let name = member.subsystem.name().to_string();
            let next = member
                .state
                .transition(LifecycleState::Initialized, &name)
                .with_context(|| format!("initialising subsystem {name}"))?;

            match member.subsystem.init(&self.broker) {
                Ok(()) => {
                    member.state = next;
                    info!(subsystem = %name, "subsystem initialized");
                }
                Err(e) => {
                    error!(
                        subsystem = %name,
                        code = %e.status_code(),
                        error = %e,
                        "subsystem init failed, rolling back"
                    );
                    self.shutdown_range(0..i);
                    return Err(e).with_context(|| format!("initialising subsystem {name}"));
                }
            }
        }
        Ok(())
    }

    /// Starts every initialised subsystem in order.
    pub fn start_all(&mut self) -> MallResult<()> {
        for member in &mut self.members {
            let name = member.subsystem.name().to_string();
            let next = member
                .state
                .transition(LifecycleState::Started, &name)
                .with_context(|| format!("starting subsystem {name}"))?;
            member
                .subsystem
                .start()
                .inspect_err(|e| {
                    error!(subsystem = %name, code = %e.status_code(), error = %e, "subsystem start failed");
                })
                .with_context(|| format!("starting subsystem {name}"))?;
            member.state = next;
            info!(subsystem = %name, "subsystem started");
        }
        Ok(())
    }

    /// Shuts down in reverse order, continuing past errors.
    ///
    /// Returns the first error. Every attempted subsystem ends `Stopped`.
    pub fn shutdown_all(&mut self) -> MallResult<()> {
        match self.shutdown_range(0..self.members.len()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn shutdown_range(
        &mut self,
        range: std::ops::Range<usize>,
    ) -> Option<StackError> {
        let mut first_error = None;
        for member in self.members[range].iter_mut().rev() {
            if !member.state.can_transition_to(LifecycleState::Stopped) {
                continue;
            }
            let name = member.subsystem.name().to_string();
            match member.subsystem.shutdown() {
                Ok(()) => info!(subsystem = %name, "subsystem shut down"),
                Err(e) => {
                    error!(subsystem = %name, code = %e.status_code(), error = %e, "subsystem shutdown failed");
                    first_error.get_or_insert_with(|| {
                        StackError::new(e).context(format!("shutting down subsystem {name}"))
                    });
                }
            }
            member.state = LifecycleState::Stopped;
        }
        first_error
    }

    pub fn states(&self) -> Vec<(String, LifecycleState)> {
        self.members
            .iter()
            .map(|m| (m.subsystem.name().to_string(), m.state))
            .collect()
    }
}
