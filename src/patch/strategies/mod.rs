//! The built-in rewriting strategies.
//!
//! - [`ConstantReturn`] - replace a method body with a constant result
//! - [`BranchInversion`] - turn one conditional jump after a marker load into a `goto`
//! - [`GuardInjection`] - inject a nested guard that reuses an existing loop label and slot

mod branch_inversion;
mod constant_return;
mod guard_injection;

pub use branch_inversion::{Adjacency, BranchInversion};
pub use constant_return::{ConstantReturn, ReplaceState};
pub use guard_injection::{GuardInjection, GuardState};
