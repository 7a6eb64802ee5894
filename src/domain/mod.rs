pub mod event;
pub mod ids;
pub mod job;
pub mod slice;
pub mod state;

pub use event::*;
pub use ids::*;
pub use job::*;
pub use slice::*;
pub use state::*;
