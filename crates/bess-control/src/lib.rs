//! BESS Control Plane - Decision Logic
//!
//! Houses the three components that select and gate actuation:
//!
//! - [`safety`] - the Safety Manager (C4), a pure veto function that
//!   outranks everything else.
//! - [`decision`] - the Decision Engine (C5), the priority-ordered
//!   intent selector.
//! - [`blackstart`] - the Black-Start FSM (C7), run as a specialization
//!   of the decision engine when grid presence is lost.
//!
//! This crate is shared by `bess-edge` (authoritative enforcement) and
//! `bess-cloud` (a cloud-side safety mirror used to pre-validate
//! commands before they are queued). Neither binary holds a direct
//! reference to the other; both depend on these pure, trivially-testable
//! functions instead.

#![warn(missing_docs)]

pub mod blackstart;
pub mod decision;
pub mod safety;

pub use blackstart::{BlackStartFsm, BlackStartState, GridReading};
pub use decision::{decide, DecisionInputs};
pub use safety::{enforce, LatchState, Verdict};
