pub mod oversize;
pub mod reconstruct;
pub mod register;
pub mod state;
pub mod store;

pub use register::{OffloadRef, Register, RegisterRole};
pub use state::{ConversationState, WindowSnapshot};
pub use store::RegisterStore;
