pub mod grace;
pub mod queue;
pub mod scheduler;
pub mod webhook;
pub mod websocket;

pub use grace::*;
pub use queue::*;
pub use scheduler::*;
pub use webhook::*;
pub use websocket::*;
