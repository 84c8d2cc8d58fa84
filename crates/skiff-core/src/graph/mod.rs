//! The transpiled-module graph: vertices, the owning manager, and the
//! blob serializer.

mod manager;
mod node;
mod serialize;

pub use manager::{Manager, Services};
pub use node::TranspiledModule;
