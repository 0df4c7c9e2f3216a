mod id;
mod messages;
mod node;
mod records;

pub use id::*;
pub use messages::*;
pub use node::*;
pub use records::*;
