//! The manager: one instance per process, one serialized state per
//! conversation id. Cross-conversation calls run fully parallel; the only
//! shared mutable state is the id → state map behind a short critical
//! section.

mod turn;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::command::Neuralyzer;
use crate::diag::DiagLog;
use crate::message::{CacheStats, ChatMessage, TurnOutput};
use crate::prompt::jit::{compile_cleaning_rules, CompiledCleaningRule};
use crate::prompt::system::SystemPromptLoader;
use crate::settings::{self, TokenWindowConfig};
use crate::tokens::{HeuristicCounter, TokenCounter};
use crate::window::state::{ConversationState, WindowSnapshot};

pub struct TokenWindowManagerBuilder {
    base_dir: PathBuf,
    config_path: Option<PathBuf>,
    counter: Option<Arc<dyn TokenCounter>>,
}

impl TokenWindowManagerBuilder {
    fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            config_path: None,
            counter: None,
        }
    }

    /// Relocate the `data/` tree (config, prompts, temp, logs). Tests point
    /// this at a tempdir.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Load and validate configuration, verify every prompt file is readable,
    /// and construct the manager. Any failure here is fatal; the pipeline
    /// must not start in a degraded state.
    pub fn build(self) -> Result<TokenWindowManager> {
        let config_path = self
            .config_path
            .unwrap_or_else(|| self.base_dir.join("data/config/token-window.json"));
        let config = settings::manager::load_or_seed(&config_path)?;

        let system_loader = SystemPromptLoader::new(&self.base_dir);
        system_loader
            .verify()
            .context("system prompt files missing or unreadable")?;

        let jit_path = self.base_dir.join(&config.jit_instruction.prompt_file);
        std::fs::metadata(&jit_path)
            .with_context(|| format!("JIT prompt file missing: {jit_path:?}"))?;
        if let Some(external) = &config.jit_instruction.external_prompt_file {
            let path = self.base_dir.join(external);
            std::fs::metadata(&path)
                .with_context(|| format!("external JIT prompt file missing: {path:?}"))?;
        }

        let cleaning = compile_cleaning_rules(&config.jit_instruction.assistant_cleaning)?;
        let diag = DiagLog::new(&self.base_dir);
        info!(
            base_dir = %self.base_dir.display(),
            max_window_size = config.max_window_size,
            "token window manager ready"
        );

        Ok(TokenWindowManager {
            base_dir: self.base_dir,
            config,
            counter: self
                .counter
                .unwrap_or_else(|| Arc::new(HeuristicCounter::default())),
            neuralyzer: Neuralyzer::new(),
            cleaning,
            system_loader,
            diag,
            conversations: Mutex::new(HashMap::new()),
        })
    }
}

pub struct TokenWindowManager {
    pub(crate) base_dir: PathBuf,
    pub(crate) config: TokenWindowConfig,
    pub(crate) counter: Arc<dyn TokenCounter>,
    pub(crate) neuralyzer: Neuralyzer,
    pub(crate) cleaning: Vec<CompiledCleaningRule>,
    pub(crate) system_loader: SystemPromptLoader,
    pub(crate) diag: DiagLog,
    conversations: Mutex<HashMap<String, Arc<AsyncMutex<ConversationState>>>>,
}

impl TokenWindowManager {
    pub fn builder() -> TokenWindowManagerBuilder {
        TokenWindowManagerBuilder::new()
    }

    pub fn config(&self) -> &TokenWindowConfig {
        &self.config
    }

    fn conversation(&self, conversation_id: &str) -> Arc<AsyncMutex<ConversationState>> {
        let mut map = self.conversations.lock().expect("conversation map poisoned");
        map.entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(ConversationState::new())))
            .clone()
    }

    /// The per-turn entry point. Turns for the same conversation id serialize
    /// on the per-conversation lock; different ids run in parallel.
    pub async fn process_request(
        &self,
        conversation_id: &str,
        messages: Vec<ChatMessage>,
        bot_id: Option<&str>,
    ) -> Result<TurnOutput> {
        let conversation = self.conversation(conversation_id);
        let mut state = conversation.lock().await;
        turn::run_turn(self, &mut state, conversation_id, messages, bot_id)
    }

    /// Stats for the previous `process_request` on the same id. The caller
    /// contract is to read these after that call returns, on the same turn.
    pub async fn get_cache_stats(&self, conversation_id: &str) -> CacheStats {
        let conversation = self.conversation(conversation_id);
        let state = conversation.lock().await;
        state.last_cache_stats
    }

    /// Diagnostic snapshot of the window.
    pub async fn get_window_state(&self, conversation_id: &str) -> Option<WindowSnapshot> {
        let existing = {
            let map = self.conversations.lock().expect("conversation map poisoned");
            map.get(conversation_id).cloned()
        };
        match existing {
            Some(conversation) => {
                let state = conversation.lock().await;
                Some(state.snapshot(self.counter.as_ref()))
            }
            None => None,
        }
    }

    /// Attach (or clear) the secondary cacheable system prompt for a
    /// conversation; when set, the system prompt renders as two blocks.
    pub async fn set_secondary_system(&self, conversation_id: &str, content: Option<String>) {
        let conversation = self.conversation(conversation_id);
        let mut state = conversation.lock().await;
        state.system2_content = content;
    }

    /// Drop all state for the id. The next turn starts as a fresh
    /// conversation.
    pub async fn reset(&self, conversation_id: &str) {
        let removed = {
            let mut map = self.conversations.lock().expect("conversation map poisoned");
            map.remove(conversation_id)
        };
        if removed.is_some() {
            self.diag
                .record("RESET", &format!("conversation={conversation_id}"));
        }
    }
}
