// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "mentions/mention_stores.rs"]
pub mod mentions;
