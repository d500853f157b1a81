mod network;
mod node;
mod visitor;

pub(crate) use network::display_path;
pub use network::Network;
pub use node::{Field, FieldKind, ModuleNode};
pub use visitor::{CollectedKey, Collector, ModuleVisitor};
