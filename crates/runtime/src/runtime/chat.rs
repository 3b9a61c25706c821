//! Conversation turn handling: screen, respond, log, remember.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use mindful_memory::{Role, VectorIndex};
use mindful_store::ChatTurn;

use crate::prompt_builder::{build_context_block, build_user_prompt};

use super::{ChatRuntime, Reply, ReplyKind};

impl ChatRuntime {
    /// Produce a reply for `message` without persisting anything.
    ///
    /// Crisis messages short-circuit to the configured crisis response and
    /// never reach memory retrieval or the model.
    #[instrument(skip(self, message, index), fields(message_len = message.len()))]
    pub async fn generate_response(
        &self,
        user_id: &str,
        message: &str,
        index: &VectorIndex,
    ) -> Result<Reply> {
        if let Some(keyword) = self.crisis.matched_keyword(message) {
            warn!(user_id, keyword, "crisis keyword detected");
            return Ok(Reply {
                text: self.config.safety.crisis_response.clone(),
                kind: ReplyKind::Crisis,
            });
        }

        let memory_cfg = &self.config.memory;
        let retrieved = self
            .memory
            .retrieve(user_id, message, index, memory_cfg.retrieval_top_k)
            .await?;
        let recent = self
            .memory
            .recent(user_id, memory_cfg.recent_window)
            .await?;
        let prompt = build_user_prompt(&build_context_block(&retrieved, &recent), message);

        let text = self
            .model
            .complete(&self.config.llm.system_prompt, &prompt)
            .await
            .context("chat model request failed")?;

        Ok(Reply {
            text,
            kind: ReplyKind::Model,
        })
    }

    /// One full chat turn for `user_id`.
    ///
    /// Turns for the same user are serialized for their whole duration.  The
    /// chat log records every turn; vector memory records only non-crisis
    /// turns, user message first.  Nothing is persisted when the model fails.
    #[instrument(skip(self, message), fields(message_len = message.len()))]
    pub async fn handle_turn(&self, user_id: &str, message: &str) -> Result<Reply> {
        let _guard = self.memory.lock_user(user_id).await;

        let mut index = self.memory.load(user_id).await?;
        let reply = self.generate_response(user_id, message, &index).await?;

        let chat_log = self.chat_log.clone();
        let turn = ChatTurn::now(user_id, message, &reply.text);
        tokio::task::spawn_blocking(move || chat_log.append(&turn))
            .await
            .context("chat log writer panicked")??;

        if !reply.is_crisis() {
            self.memory
                .store(user_id, &mut index, message, Role::User)
                .await?;
            self.memory
                .store(user_id, &mut index, &reply.text, Role::Bot)
                .await?;
            self.memory.save(user_id, &index).await?;
        }

        info!(user_id, crisis = reply.is_crisis(), vectors = index.len(), "turn complete");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use tempfile::TempDir;

    use mindful_config::{AppConfig, DEFAULT_CRISIS_RESPONSE};
    use mindful_llm::{ChatModel, Embedder};
    use mindful_memory::VectorMemory;
    use mindful_store::Store;

    use crate::{ChatRuntime, ReplyKind};

    const DIM: usize = 16;

    #[derive(Default)]
    struct ScriptedModel {
        reply: String,
        fail: bool,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn last_user_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            if self.fail {
                bail!("model offline");
            }
            Ok(self.reply.clone())
        }
    }

    #[derive(Default)]
    struct WordEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for WordEmbedder {
        fn dimension(&self) -> usize {
            DIM
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0; DIM];
                    for word in text.to_lowercase().split_whitespace() {
                        let bucket = word
                            .bytes()
                            .fold(7usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                        v[bucket % DIM] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct Harness {
        _dir: TempDir,
        runtime: ChatRuntime,
        model: Arc<ScriptedModel>,
        embedder: Arc<WordEmbedder>,
    }

    fn harness(model: ScriptedModel) -> Harness {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.memory.data_dir = dir.path().join("data").display().to_string();
        config.embedding.dimension = DIM;

        let model = Arc::new(model);
        let embedder = Arc::new(WordEmbedder::default());
        let memory = Arc::new(VectorMemory::from_config(&config.memory, embedder.clone()));
        let chat_log = Store::open(dir.path().join("mindful.redb")).unwrap().chat_log();
        let runtime = ChatRuntime::new(config, model.clone(), memory, chat_log).unwrap();

        Harness {
            _dir: dir,
            runtime,
            model,
            embedder,
        }
    }

    #[tokio::test]
    async fn crisis_turn_skips_model_and_memory_but_is_logged() {
        let h = harness(ScriptedModel::replying("unused"));

        let reply = h.runtime.handle_turn("alice", "I want to END MY LIFE").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::Crisis);
        assert!(reply.text.contains("https://findahelpline.com/"));
        assert_eq!(h.model.calls(), 0);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

        let stats = h.runtime.memory().stats("alice").await.unwrap();
        assert_eq!(stats.vectors, 0);
        assert_eq!(stats.transcript_records, 0);

        let turns = h.runtime.chat_log().turns_for("alice").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].bot_response, reply.text);
    }

    #[tokio::test]
    async fn crisis_after_normal_turn_returns_fixed_text_and_leaves_memory_alone() {
        let h = harness(ScriptedModel::replying("That sounds like a lot to carry."));
        h.runtime.handle_turn("alice", "I feel anxious today").await.unwrap();
        let before = h.runtime.memory().stats("alice").await.unwrap();
        assert_eq!(before.vectors, 2);
        assert_eq!(before.transcript_records, 2);

        let reply = h.runtime.handle_turn("alice", "I want to end my life").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::Crisis);
        assert_eq!(reply.text, h.runtime.config.safety.crisis_response);
        assert_eq!(reply.text, DEFAULT_CRISIS_RESPONSE);
        assert_eq!(h.model.calls(), 1);
        assert_eq!(h.runtime.memory().stats("alice").await.unwrap(), before);

        let turns = h.runtime.chat_log().turns_for("alice").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].user_message, "I want to end my life");
        assert_eq!(turns[1].bot_response, DEFAULT_CRISIS_RESPONSE);
    }

    #[tokio::test]
    async fn first_turn_prompt_is_bare_message() {
        let h = harness(ScriptedModel::replying("Try a slow breath in and out."));

        let reply = h.runtime.handle_turn("alice", "I feel anxious today").await.unwrap();

        assert_eq!(reply.kind, ReplyKind::Model);
        assert_eq!(reply.text, "Try a slow breath in and out.");
        assert_eq!(h.model.last_user_prompt(), "User: I feel anxious today\nChatbot:");
        let (system, _) = h.model.prompts.lock().unwrap()[0].clone();
        assert_eq!(system, h.runtime.config.llm.system_prompt);

        assert_eq!(
            h.runtime.memory().recent("alice", 10).await.unwrap(),
            "user: I feel anxious today\nbot: Try a slow breath in and out."
        );
        let stats = h.runtime.memory().stats("alice").await.unwrap();
        assert_eq!(stats.vectors, 2);
        assert_eq!(stats.transcript_records, 2);
        assert_eq!(h.runtime.chat_log().turns_for("alice").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_turn_sees_relevant_and_recent_context() {
        let h = harness(ScriptedModel::replying("I hear you."));
        h.runtime.handle_turn("alice", "I feel anxious today").await.unwrap();

        h.runtime.handle_turn("alice", "still anxious").await.unwrap();

        let prompt = h.model.last_user_prompt();
        assert!(prompt.starts_with("Relevant context:\n"), "{prompt}");
        assert!(prompt.contains("Recent messages:\nuser: I feel anxious today\nbot: I hear you.\n\n"));
        assert!(prompt.ends_with("User: still anxious\nChatbot:"));

        let stats = h.runtime.memory().stats("alice").await.unwrap();
        assert_eq!(stats.vectors, 4);
        assert_eq!(stats.transcript_records, 4);
    }

    #[tokio::test]
    async fn users_do_not_share_memory() {
        let h = harness(ScriptedModel::replying("ok"));
        h.runtime.handle_turn("alice", "my cat is called Miso").await.unwrap();

        h.runtime.handle_turn("bob", "hello").await.unwrap();

        assert_eq!(h.model.last_user_prompt(), "User: hello\nChatbot:");
        assert!(h.runtime.chat_log().turns_for("bob").unwrap().len() == 1);
    }

    #[tokio::test]
    async fn model_failure_persists_nothing() {
        let h = harness(ScriptedModel {
            fail: true,
            ..ScriptedModel::default()
        });

        assert!(h.runtime.handle_turn("alice", "hello").await.is_err());

        assert!(h.runtime.chat_log().turns_for("alice").unwrap().is_empty());
        assert_eq!(h.runtime.memory().stats("alice").await.unwrap().transcript_records, 0);
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_user_keep_index_and_transcript_aligned() {
        let h = Arc::new(harness(ScriptedModel::replying("noted")));
        let mut tasks = Vec::new();
        for i in 0..4 {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                h.runtime.handle_turn("alice", &format!("message {i}")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = h.runtime.memory().stats("alice").await.unwrap();
        assert_eq!(stats.vectors, 8);
        assert_eq!(stats.transcript_records, 8);
    }
}
