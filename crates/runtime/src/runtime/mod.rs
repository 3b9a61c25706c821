//! Chat runtime: crisis screening, memory-augmented prompting and the
//! per-turn persistence sequence.

mod chat;

use std::sync::Arc;

use anyhow::Result;

use mindful_config::AppConfig;
use mindful_llm::ChatModel;
use mindful_memory::VectorMemory;
use mindful_store::ChatLog;

use crate::crisis::CrisisDetector;

/// Which branch produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// The fixed crisis message; the model was not called.
    Crisis,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
}

impl Reply {
    pub fn is_crisis(&self) -> bool {
        self.kind == ReplyKind::Crisis
    }
}

pub struct ChatRuntime {
    pub config: AppConfig,
    model: Arc<dyn ChatModel>,
    memory: Arc<VectorMemory>,
    chat_log: ChatLog,
    crisis: CrisisDetector,
}

impl ChatRuntime {
    pub fn new(
        config: AppConfig,
        model: Arc<dyn ChatModel>,
        memory: Arc<VectorMemory>,
        chat_log: ChatLog,
    ) -> Result<Self> {
        let crisis = CrisisDetector::new(&config.safety.crisis_keywords)?;
        Ok(Self {
            config,
            model,
            memory,
            chat_log,
            crisis,
        })
    }

    pub fn memory(&self) -> &VectorMemory {
        &self.memory
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    pub fn crisis(&self) -> &CrisisDetector {
        &self.crisis
    }
}
