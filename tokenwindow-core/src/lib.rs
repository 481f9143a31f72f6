pub mod cache;
pub mod command;
pub mod diag;
pub mod manager;
pub mod message;
pub mod prompt;
pub mod settings;
pub mod tokens;
pub mod window;

// Public library API - hosts embedding the manager should only need these.
pub use manager::{TokenWindowManager, TokenWindowManagerBuilder};
pub use message::{CacheStats, ChatMessage, Role, SystemPrompt, TurnOutput};
pub use settings::TokenWindowConfig;
pub use tokens::{HeuristicCounter, ModelFamily, TokenCounter};
pub use window::WindowSnapshot;
