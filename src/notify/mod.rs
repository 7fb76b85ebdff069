//! Mutation notification bus
//!
//! Every structural mutation fires a **pre** callback (state still
//! consistent, operation about to happen) and a **post** callback
//! (operation complete, state consistent again) to every registered
//! observer, in registration order, synchronously on the mutating thread.
//! This is how dependent subsystems (a timing-graph cache, for example)
//! track mutation without polling or knowing storage internals.
//!
//! Observers must not trigger destructive structural mutation from inside
//! a callback; reentrancy is undefined. Reading is safe.

use serde::Serialize;

/// Which table a mutated object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObjectKind {
    Instance,
    Net,
    ITerm,
    BTerm,
    Module,
    ModInst,
    ModNet,
    ModITerm,
    ModBTerm,
}

/// The structural operation being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationOp {
    Create,
    Destroy,
    /// Connection to a peer object (e.g. pin to net); `peer` is the raw
    /// handle of the other endpoint.
    Connect {
        peer: u32,
    },
    Disconnect {
        peer: u32,
    },
    StatusChange,
}

/// One mutation, identified by object kind, raw handle, and operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MutationEvent {
    pub kind: ObjectKind,
    pub id: u32,
    pub op: MutationOp,
}

/// Registrable observer. All methods default to no-ops so an observer
/// implements only the events it cares about.
#[allow(unused_variables)]
pub trait NetlistObserver {
    fn pre_create(&mut self, event: &MutationEvent) {}
    fn post_create(&mut self, event: &MutationEvent) {}
    fn pre_destroy(&mut self, event: &MutationEvent) {}
    fn post_destroy(&mut self, event: &MutationEvent) {}
    fn pre_connect(&mut self, event: &MutationEvent) {}
    fn post_connect(&mut self, event: &MutationEvent) {}
    fn pre_disconnect(&mut self, event: &MutationEvent) {}
    fn post_disconnect(&mut self, event: &MutationEvent) {}
    fn pre_status_change(&mut self, event: &MutationEvent) {}
    fn post_status_change(&mut self, event: &MutationEvent) {}
}

/// Synchronous observer dispatch, scoped to one open database.
#[derive(Default)]
pub struct NotificationBus {
    observers: Vec<Box<dyn NetlistObserver>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Dispatch order is registration order.
    pub fn register(&mut self, observer: Box<dyn NetlistObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Fire the pre-operation callback for `event` on every observer.
    pub fn emit_pre(&mut self, event: &MutationEvent) {
        for obs in &mut self.observers {
            match event.op {
                MutationOp::Create => obs.pre_create(event),
                MutationOp::Destroy => obs.pre_destroy(event),
                MutationOp::Connect { .. } => obs.pre_connect(event),
                MutationOp::Disconnect { .. } => obs.pre_disconnect(event),
                MutationOp::StatusChange => obs.pre_status_change(event),
            }
        }
    }

    /// Fire the post-operation callback for `event` on every observer.
    pub fn emit_post(&mut self, event: &MutationEvent) {
        for obs in &mut self.observers {
            match event.op {
                MutationOp::Create => obs.post_create(event),
                MutationOp::Destroy => obs.post_destroy(event),
                MutationOp::Connect { .. } => obs.post_connect(event),
                MutationOp::Disconnect { .. } => obs.post_disconnect(event),
                MutationOp::StatusChange => obs.post_status_change(event),
            }
        }
    }
}
