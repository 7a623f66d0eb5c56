// ============================================================================
// Lifecycle State Machine
// ============================================================================
//
// A closed set of lifecycle states plus a total transition table over the
// events a tracked instance can receive. Transition functions are pure:
// (state, event inputs) -> (next state, effect flags). The StateManager
// applies the effects; nothing in this module touches a store or an
// instance.
//
// ============================================================================

pub mod state;
pub mod transitions;

pub use state::{LifecycleEvent, LifecycleState};
pub use transitions::{
    Denial, Effects, FlushAction, ReadAction, RefreshAction, StoreOp, Transition,
};
