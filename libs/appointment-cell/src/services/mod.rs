pub mod clock;
pub mod events;
pub mod lifecycle;
pub mod redis_store;
pub mod reservation;
pub mod sequencer;
pub mod store;

pub use clock::*;
pub use events::*;
pub use lifecycle::*;
pub use redis_store::*;
pub use reservation::*;
pub use sequencer::*;
pub use store::*;
