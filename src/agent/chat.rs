//! Non-streaming turn loop over chat completions.
//!
//! Every request resends the full message log; position zero always holds the
//! system message, regenerated each round.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{MessageHandler, StringCollector};
use super::image::image_urls;
use super::llm::ChatRequest;
use super::message::{cleanup_trailing, truncate_unanswered_tool_group, ChatMessage, Message, Role};
use super::prompt::{COMPACT_PROMPT, SHORT_SUMMARY_PROMPT};
use super::thread::{MessageOpt, Thread, ThreadCore};
use crate::error::Error;
use crate::platform::ApiMode;
use crate::projection;
use crate::tools::PlainRenderer;
use crate::Result;

/// Outcome of one request/response round.
struct Exchange {
    text: String,
    tools_used: bool,
}

/// Thread speaking the chat completions protocol.
pub struct ChatThread {
    core: ThreadCore,
    messages: Vec<ChatMessage>,
}

impl ChatThread {
    pub(crate) fn from_core(core: ThreadCore) -> Self {
        Self {
            core,
            messages: Vec::new(),
        }
    }

    /// The raw message log.
    pub fn log(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn ensure_system_message(&mut self) {
        if self.messages.first().map(|m| m.role) != Some(Role::System) {
            self.messages.insert(0, ChatMessage::system(""));
        }
    }

    /// Restore the pairing invariant after an interrupted round.
    fn repair_log(&mut self) {
        let truncated = truncate_unanswered_tool_group(&mut self.messages);
        let removed = cleanup_trailing(&mut self.messages);
        if truncated || removed > 0 {
            debug!(truncated, removed, "Repaired message log");
        }
    }

    async fn exchange(
        &mut self,
        handler: &dyn MessageHandler,
        opt: &MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<Exchange> {
        let (model, max_tokens) = self.core.model_for(opt);
        let reasoning_effort = self.core.reasoning_effort(&model);
        let is_reasoning = self.core.resolution().is_reasoning_model(&model);

        let request = ChatRequest {
            model: model.clone(),
            messages: self.messages.clone(),
            tools: if opt.no_tool_use {
                Vec::new()
            } else {
                self.core.deps.tools.definitions()
            },
            max_tokens: (!is_reasoning).then_some(max_tokens),
            reasoning_effort,
        };

        debug!(model = %model, messages = request.messages.len(), "Sending chat request");
        let response = self.core.deps.backend.chat.complete(request, cancel).await?;
        self.core.record_usage(&model, response.usage);

        let message = response.message;
        self.messages.push(message.clone());

        if let Some(thinking) = message.reasoning_content.as_deref() {
            if !thinking.is_empty() {
                handler.handle_thinking(thinking);
            }
        }
        if !message.content.is_empty() {
            handler.handle_text(&message.content);
        }

        if message.tool_calls.is_empty() {
            return Ok(Exchange {
                text: message.content,
                tools_used: false,
            });
        }

        let ctx = self.core.tool_context(cancel);
        for call in &message.tool_calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let name = &call.function.name;
            handler.handle_tool_use(&call.id, name, &call.function.arguments);
            debug!(tool = %name, call_id = %call.id, "Executing tool");

            let output = self
                .core
                .deps
                .tools
                .execute(&ctx, name, &call.function.arguments)
                .await;

            self.messages
                .push(ChatMessage::tool_result(&call.id, output.assistant_facing.clone()));
            self.core
                .tool_results
                .insert(call.id.clone(), output.structured.clone());
            handler.handle_tool_result(&call.id, name, &output);
        }

        Ok(Exchange {
            text: message.content,
            tools_used: true,
        })
    }

    async fn run_turns(
        &mut self,
        handler: &dyn MessageHandler,
        opt: &MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let (model, _) = self.core.model_for(opt);
        let max_turns = self.core.max_turns(opt);
        let mut final_output = String::new();
        let mut turn = 0;

        loop {
            if cancel.is_cancelled() {
                info!("Turn cancelled");
                self.repair_log();
                break;
            }
            if max_turns > 0 && turn >= max_turns {
                warn!(turn, max_turns, "Reached maximum turn limit, stopping");
                break;
            }
            turn += 1;

            if !opt.disable_auto_compact && self.core.should_auto_compact(opt.compact_ratio) {
                info!(compact_ratio = opt.compact_ratio, "Triggering auto-compact");
                if let Err(e) = self.compact_context(cancel).await {
                    error!(error = %e, "Failed to auto-compact context");
                }
            }

            self.messages[0].content = self.core.system_prompt(&model);

            let exchange = match self.exchange(handler, opt, cancel).await {
                Ok(exchange) => exchange,
                Err(Error::Cancelled) => {
                    info!("Request cancelled");
                    self.repair_log();
                    break;
                }
                Err(e) => return Err(e),
            };

            final_output = exchange.text;
            if !exchange.tools_used {
                break;
            }

            if !opt.no_save_conversation {
                if let Err(e) = self.save_conversation(false).await {
                    warn!(error = %e, "Failed to save conversation after tool round");
                }
            }
        }

        Ok(final_output)
    }
}

#[async_trait]
impl Thread for ChatThread {
    async fn send_message(
        &mut self,
        message: &str,
        handler: &dyn MessageHandler,
        opt: MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let snapshot = opt.no_save_conversation.then(|| self.messages.clone());

        let images = image_urls(&opt.images).await;
        self.messages.push(ChatMessage::user_with_images(message, images));
        self.ensure_system_message();

        let result = self.run_turns(handler, &opt, cancel).await;

        if let Some(snapshot) = snapshot {
            self.messages = snapshot;
        }
        let final_output = result?;

        if !opt.no_save_conversation {
            if let Err(e) = self.save_conversation(true).await {
                warn!(error = %e, "Failed to save conversation");
            }
        }

        if !self.core.is_sub_agent() {
            handler.handle_done();
        }

        Ok(final_output)
    }

    async fn save_conversation(&mut self, summarize: bool) -> Result<()> {
        let Some(store) = self.core.store() else {
            return Ok(());
        };

        if summarize {
            self.core.summary = self.short_summary().await;
        }

        let lock = self.core.conversation_lock.clone();
        let _guard = lock.lock().await;

        self.repair_log();
        let raw = serde_json::to_value(&self.messages)?;
        let record = self.core.build_record(raw);
        store.save(record)?;

        debug!(
            conversation_id = %self.core.conversation_id,
            messages = self.messages.len(),
            "Saved conversation"
        );
        Ok(())
    }

    async fn load_conversation(&mut self) -> Result<()> {
        let Some(store) = self.core.store() else {
            return Ok(());
        };

        let lock = self.core.conversation_lock.clone();
        let _guard = lock.lock().await;

        let record = store.load(&self.core.conversation_id)?;
        self.core.check_record(&record)?;

        let mut messages: Vec<ChatMessage> = if record.raw_messages.is_null() {
            Vec::new()
        } else {
            serde_json::from_value(record.raw_messages.clone())?
        };
        truncate_unanswered_tool_group(&mut messages);
        cleanup_trailing(&mut messages);

        self.messages = messages;
        self.core.restore(record);

        info!(
            conversation_id = %self.core.conversation_id,
            messages = self.messages.len(),
            "Loaded conversation"
        );
        Ok(())
    }

    async fn short_summary(&self) -> String {
        let mut summary_thread = ChatThread::from_core(self.core.detached());
        summary_thread.messages = self.messages.clone();

        let collector = StringCollector::silent();
        let opt = MessageOpt {
            use_weak_model: true,
            no_tool_use: true,
            no_save_conversation: true,
            ..MessageOpt::default()
        };

        match summary_thread
            .send_message(SHORT_SUMMARY_PROMPT, &collector, opt, &CancellationToken::new())
            .await
        {
            Ok(_) => collector.collected().trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to generate summary");
                "Could not generate summary.".to_string()
            }
        }
    }

    async fn compact_context(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.messages.iter().all(|m| m.role.is_instruction()) {
            return Ok(());
        }

        let mut summary_thread = ChatThread::from_core(self.core.compaction_copy());
        summary_thread.messages = self.messages.clone();

        let collector = StringCollector::silent();
        let opt = MessageOpt {
            no_tool_use: true,
            no_save_conversation: true,
            disable_auto_compact: true,
            ..MessageOpt::default()
        };
        summary_thread
            .send_message(COMPACT_PROMPT, &collector, opt, cancel)
            .await
            .map_err(|e| Error::Other(format!("failed to generate compact summary: {}", e)))?;

        let summary = collector.collected().trim().to_string();
        if summary.is_empty() {
            return Err(Error::Other("compaction produced an empty summary".to_string()));
        }

        let before = self.messages.len();
        self.messages = vec![ChatMessage::system(""), ChatMessage::user(summary)];
        self.core.reset_after_compaction();
        info!(before, "Compacted conversation history");
        Ok(())
    }

    fn messages(&self) -> Result<Vec<Message>> {
        let raw = serde_json::to_value(&self.messages)?;
        projection::extract_messages(
            &raw,
            ApiMode::ChatCompletions,
            &self.core.tool_results,
            &PlainRenderer,
        )
    }

    fn core(&self) -> &ThreadCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ThreadCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::handler::testing::{Event, Recorder};
    use crate::agent::llm::{ChatResponse, FakeChatClient, FakeResponsesClient};
    use crate::agent::message::ToolCall;
    use crate::agent::thread::testing::{core, harness};
    use crate::agent::usage::TokenCounts;
    use crate::agent::llm::ChatClient;
    use crate::persistence::{ConversationStore, MemoryConversationStore, API_MODE_KEY};
    use serde_json::json;
    use std::sync::Arc;

    fn weather_call() -> ChatMessage {
        ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall::new("call_1", "get_weather", r#"{"city":"Paris"}"#)],
        )
    }

    fn thread_with(
        messages: Vec<ChatMessage>,
    ) -> (ChatThread, Arc<FakeChatClient>, Arc<MemoryConversationStore>) {
        let h = harness(FakeChatClient::new(messages), FakeResponsesClient::default());
        let thread = ChatThread::from_core(core(ApiMode::ChatCompletions, h.deps));
        (thread, h.chat, h.store)
    }

    #[tokio::test]
    async fn test_weather_scenario() {
        let (mut thread, client, _) = thread_with(vec![weather_call(), ChatMessage::assistant("It's sunny!")]);
        let recorder = Recorder::default();

        let output = thread
            .send_message("What's the weather?", &recorder, MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output, "It's sunny!");
        assert_eq!(
            recorder.events(),
            vec![
                Event::ToolUse {
                    call_id: "call_1".to_string(),
                    name: "get_weather".to_string()
                },
                Event::ToolResult {
                    call_id: "call_1".to_string(),
                    success: true
                },
                Event::Text("It's sunny!".to_string()),
                Event::Done,
            ]
        );

        let roles: Vec<Role> = thread.log().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(thread.log()[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(thread.log()[3].content, "Sunny, 25C");
        assert!(thread.structured_tool_results().contains_key("call_1"));

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools.len(), 1);
        assert_eq!(requests[0].max_tokens, Some(8192));
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[0].messages[0].content, "You are a test agent.");
    }

    #[tokio::test]
    async fn test_system_message_inserted_once() {
        let (mut thread, client, _) = thread_with(vec![
            ChatMessage::assistant("one"),
            ChatMessage::assistant("two"),
        ]);
        let recorder = Recorder::default();
        let cancel = CancellationToken::new();

        thread.send_message("a", &recorder, MessageOpt::default(), &cancel).await.unwrap();
        thread.send_message("b", &recorder, MessageOpt::default(), &cancel).await.unwrap();

        let systems = thread.log().iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
        assert_eq!(thread.log()[0].role, Role::System);
        assert_eq!(client.requests()[1].messages.len(), 4);
    }

    #[tokio::test]
    async fn test_no_tool_use_sends_no_schemas() {
        let (mut thread, client, _) = thread_with(vec![ChatMessage::assistant("ok")]);
        let opt = MessageOpt {
            no_tool_use: true,
            ..MessageOpt::default()
        };
        thread
            .send_message("hi", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();
        assert!(client.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_request_leaves_paired_log() {
        let (mut thread, client, _) = thread_with(vec![weather_call()]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let recorder = Recorder::default();

        let output = thread
            .send_message("What's the weather?", &recorder, MessageOpt::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(output, "");
        assert!(client.requests().is_empty());
        let last = thread.log().last().unwrap();
        assert!(!(last.role == Role::Assistant && last.has_tool_calls()));
        assert_eq!(recorder.events(), vec![Event::Done]);
    }

    /// Client that cancels the turn as soon as it returns a tool call.
    struct CancellingClient {
        inner: FakeChatClient,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ChatClient for CancellingClient {
        async fn complete(&self, request: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse> {
            let response = self.inner.complete(request, cancel).await;
            self.cancel.cancel();
            response
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_tool_group_drops_unanswered_calls() {
        let cancel = CancellationToken::new();
        let two_calls = ChatMessage::assistant_with_tools(
            "",
            vec![
                ToolCall::new("call_1", "get_weather", "{}"),
                ToolCall::new("call_2", "get_weather", "{}"),
            ],
        );
        let client: Arc<dyn ChatClient> = Arc::new(CancellingClient {
            inner: FakeChatClient::new(vec![two_calls]),
            cancel: cancel.clone(),
        });
        let h = harness(FakeChatClient::default(), FakeResponsesClient::default());
        let mut deps = h.deps;
        deps.backend.chat = client;
        let mut thread = ChatThread::from_core(core(ApiMode::ChatCompletions, deps));

        let result = thread
            .send_message("weather twice", &Recorder::default(), MessageOpt::default(), &cancel)
            .await;

        assert!(result.is_ok());
        let last = thread.log().last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(thread
            .log()
            .iter()
            .all(|m| !(m.role == Role::Assistant && m.has_tool_calls())));
    }

    #[tokio::test]
    async fn test_provider_error_aborts_turn() {
        let (mut thread, client, _) = thread_with(Vec::new());
        client.push_result(Err(Error::Provider("boom".to_string())));
        let recorder = Recorder::default();

        let err = thread
            .send_message("hi", &recorder, MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_max_turns_stops_tool_loop() {
        let (mut thread, client, _) = thread_with(vec![weather_call(), weather_call()]);
        let opt = MessageOpt {
            max_turns: 1,
            ..MessageOpt::default()
        };
        thread
            .send_message("loop", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_save_conversation_restores_log() {
        let (mut thread, _, store) = thread_with(vec![ChatMessage::assistant("scratch")]);
        thread.enable_persistence(true);
        let opt = MessageOpt {
            no_save_conversation: true,
            ..MessageOpt::default()
        };
        thread
            .send_message("temp", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();
        assert!(thread.log().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sub_agent_never_signals_done() {
        let h = harness(
            FakeChatClient::new(vec![ChatMessage::assistant("found it")]),
            FakeResponsesClient::default(),
        );
        let parent = core(ApiMode::ChatCompletions, h.deps);
        let mut sub = parent.subagent_context().spawn().unwrap();
        let recorder = Recorder::default();

        let output = sub
            .send_message("look", &recorder, MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output, "found it");
        assert_eq!(recorder.events(), vec![Event::Text("found it".to_string())]);
        assert_eq!(parent.usage.snapshot().input_tokens, 100);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let (mut thread, client, store) = thread_with(vec![
            weather_call(),
            ChatMessage::assistant("It's sunny!"),
            ChatMessage::assistant("Weather question"),
        ]);
        thread.enable_persistence(true);
        thread
            .send_message("What's the weather?", &Recorder::default(), MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(client.requests().len(), 3);
        assert_eq!(thread.summary(), "Weather question");

        let record = store.load(thread.conversation_id()).unwrap();
        assert_eq!(record.metadata[API_MODE_KEY], "chat_completions");

        let h = harness(FakeChatClient::default(), FakeResponsesClient::default());
        let mut deps = h.deps;
        deps.store = Some(store.clone());
        let mut restored = ChatThread::from_core(core(ApiMode::ChatCompletions, deps));
        restored.set_conversation_id(thread.conversation_id());
        restored.enable_persistence(true);
        restored.load_conversation().await.unwrap();

        assert_eq!(restored.log(), thread.log());
        assert_eq!(restored.usage(), thread.usage());
        assert_eq!(restored.structured_tool_results(), thread.structured_tool_results());
        assert_eq!(restored.summary(), "Weather question");

        let mut again = restored.log().to_vec();
        assert_eq!(cleanup_trailing(&mut again), 0);
        assert!(!truncate_unanswered_tool_group(&mut again));
    }

    #[tokio::test]
    async fn test_save_cleans_interrupted_tail() {
        let (mut thread, _, store) = thread_with(Vec::new());
        thread.enable_persistence(true);
        thread.core.summary = "already summarized".to_string();
        thread.messages = vec![
            ChatMessage::system("s"),
            ChatMessage::user("q"),
            weather_call(),
        ];
        thread.save_conversation(true).await.unwrap();

        let record = store.load(thread.conversation_id()).unwrap();
        let saved: Vec<ChatMessage> = serde_json::from_value(record.raw_messages).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_load_rejects_streaming_record() {
        let (mut thread, _, store) = thread_with(Vec::new());
        let mut record = thread.core.build_record(json!([]));
        record.metadata.insert(API_MODE_KEY.to_string(), json!("responses"));
        store.save(record).unwrap();

        thread.enable_persistence(true);
        thread.messages = vec![ChatMessage::user("keep me")];
        let err = thread.load_conversation().await.unwrap_err();
        assert!(matches!(err, Error::ApiModeMismatch { .. }));
        assert_eq!(thread.log().len(), 1);
    }

    #[tokio::test]
    async fn test_load_accepts_legacy_record_without_discriminator() {
        let (mut thread, _, store) = thread_with(Vec::new());
        let mut record = crate::persistence::ConversationRecord::new(thread.conversation_id());
        record.raw_messages = json!([
            {"role": "system", "content": "old prompt"},
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": "hi"}
        ]);
        store.save(record).unwrap();

        thread.enable_persistence(true);
        thread.load_conversation().await.unwrap();
        assert_eq!(thread.log().len(), 3);

        let flat = thread.messages().unwrap();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].content, "hello");
    }

    #[tokio::test]
    async fn test_reasoning_model_request_shape() {
        let (mut thread, client, _) = thread_with(vec![ChatMessage::assistant("done")]);
        thread.core.config.model = "o3".to_string();
        thread
            .send_message("think", &Recorder::default(), MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap();
        let request = &client.requests()[0];
        assert_eq!(request.max_tokens, None);
        assert_eq!(request.reasoning_effort.as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn test_cached_tokens_are_priced() {
        let (mut thread, client, _) = thread_with(Vec::new());
        client.push_result(Ok(ChatResponse {
            message: ChatMessage::assistant("hi"),
            usage: TokenCounts {
                input: 1000,
                output: 100,
                cached_input: 4000,
            },
            model: "gpt-4.1".to_string(),
        }));
        thread
            .send_message("hi", &Recorder::default(), MessageOpt::default(), &CancellationToken::new())
            .await
            .unwrap();
        let usage = thread.usage();
        assert_eq!(usage.cache_read_input_tokens, 4000);
        assert!(usage.cache_read_cost > 0.0);
        assert_eq!(usage.current_context_window, 5100);
    }

    #[tokio::test]
    async fn test_summary_refreshed_on_every_turn() {
        let (mut thread, _, store) = thread_with(vec![
            ChatMessage::assistant("one"),
            ChatMessage::assistant("First topic"),
            ChatMessage::assistant("two"),
            ChatMessage::assistant("Second topic"),
        ]);
        thread.enable_persistence(true);
        let cancel = CancellationToken::new();

        thread.send_message("a", &Recorder::default(), MessageOpt::default(), &cancel).await.unwrap();
        assert_eq!(thread.summary(), "First topic");
        thread.send_message("b", &Recorder::default(), MessageOpt::default(), &cancel).await.unwrap();
        assert_eq!(thread.summary(), "Second topic");
        assert_eq!(store.load(thread.conversation_id()).unwrap().summary, "Second topic");
    }

    #[tokio::test]
    async fn test_images_ride_on_the_user_message() {
        let (mut thread, client, _) = thread_with(vec![ChatMessage::assistant("A cat.")]);
        let opt = MessageOpt {
            images: vec![
                "https://example.com/cat.png".to_string(),
                "http://example.com/insecure.png".to_string(),
            ],
            ..MessageOpt::default()
        };
        thread
            .send_message("What is this?", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();

        let request = &client.requests()[0];
        assert_eq!(request.messages[1].images, vec!["https://example.com/cat.png".to_string()]);
        let body = request.to_body();
        assert_eq!(body["messages"][1]["content"][0]["type"], "image_url");
        assert_eq!(body["messages"][1]["content"][1]["text"], "What is this?");
    }

    #[tokio::test]
    async fn test_compact_context_replaces_history() {
        let (mut thread, client, _) = thread_with(vec![
            weather_call(),
            ChatMessage::assistant("It's sunny!"),
            ChatMessage::assistant("User asked for the weather in Paris; it is sunny."),
        ]);
        let cancel = CancellationToken::new();
        thread
            .send_message("What's the weather?", &Recorder::default(), MessageOpt::default(), &cancel)
            .await
            .unwrap();
        thread.core.state.touch_file("notes.md");

        thread.compact_context(&cancel).await.unwrap();

        assert_eq!(
            thread.log(),
            &[
                ChatMessage::system(""),
                ChatMessage::user("User asked for the weather in Paris; it is sunny."),
            ]
        );
        assert!(thread.structured_tool_results().is_empty());
        assert!(thread.core.state.file_last_access().is_empty());
        assert_eq!(thread.usage().input_tokens, 300);
        assert_eq!(thread.usage().current_context_window, 0);

        let requests = client.requests();
        let summary_request = &requests[2];
        assert!(summary_request.tools.is_empty());
        assert_eq!(summary_request.messages.last().unwrap().content, COMPACT_PROMPT);
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_history() {
        let (mut thread, _, _) = thread_with(vec![ChatMessage::assistant("hello")]);
        let cancel = CancellationToken::new();
        thread.send_message("hi", &Recorder::default(), MessageOpt::default(), &cancel).await.unwrap();

        let err = thread.compact_context(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("failed to generate compact summary"));
        assert_eq!(thread.log().len(), 3);

        let (mut empty, client, _) = thread_with(Vec::new());
        empty.compact_context(&cancel).await.unwrap();
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_auto_compact_runs_before_request() {
        let (mut thread, client, _) = thread_with(vec![
            ChatMessage::assistant("Earlier we discussed the build."),
            ChatMessage::assistant("Continuing."),
        ]);
        thread.messages = vec![
            ChatMessage::system("s"),
            ChatMessage::user("fix the build"),
            ChatMessage::assistant("done"),
        ];
        thread.core.usage.replace(crate::agent::Usage {
            current_context_window: 900,
            max_context_window: 1000,
            ..crate::agent::Usage::default()
        });

        let opt = MessageOpt {
            compact_ratio: 0.8,
            ..MessageOpt::default()
        };
        let output = thread
            .send_message("and now?", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output, "Continuing.");
        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages.last().unwrap().content, COMPACT_PROMPT);
        assert_eq!(requests[1].messages.len(), 2);
        assert_eq!(requests[1].messages[1].content, "Earlier we discussed the build.");
        assert_eq!(requests[1].messages[0].content, "You are a test agent.");
    }
}
