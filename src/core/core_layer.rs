// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "mentions/mention_service.rs"]
pub mod mentions;
