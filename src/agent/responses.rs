//! Streaming turn loop over the responses protocol.
//!
//! Requests carry no history. When the endpoint keeps server-side state the
//! next request references the previous response and sends only the items the
//! server has not seen yet (the pending items); otherwise the whole item log is
//! replayed.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handler::{MessageHandler, StringCollector};
use super::image::image_urls;
use super::items::{
    drop_unanswered_calls, function_call_output, parse_items, replay_input, user_message,
    user_message_with_images, ConversationItem,
};
use super::llm::ResponsesRequest;
use super::message::Message;
use super::prompt::{COMPACT_PROMPT, SHORT_SUMMARY_PROMPT};
use super::stream::{AssembledResponse, Block, StreamAssembler};
use super::thread::{MessageOpt, Thread, ThreadCore};
use crate::error::Error;
use crate::persistence::LAST_RESPONSE_ID_KEY;
use crate::platform::ApiMode;
use crate::projection;
use crate::tools::PlainRenderer;
use crate::Result;

/// Key older records used for the continuation token.
const LEGACY_LAST_RESPONSE_ID_KEY: &str = "lastResponseID";

const INVALID_CONTINUATION_PATTERNS: [&str; 5] = [
    "previous_response",
    "response not found",
    "invalid response id",
    "response id not found",
    "no response found",
];

struct Exchange {
    text: String,
    tools_used: bool,
}

/// Thread speaking the streaming responses protocol.
pub struct ResponsesThread {
    core: ThreadCore,
    items: Vec<ConversationItem>,
    pending: Vec<Value>,
    last_response_id: Option<String>,
}

impl ResponsesThread {
    pub(crate) fn from_core(core: ThreadCore) -> Self {
        Self {
            core,
            items: Vec::new(),
            pending: Vec::new(),
            last_response_id: None,
        }
    }

    /// The conversation item log.
    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn last_response_id(&self) -> Option<&str> {
        self.last_response_id.as_deref()
    }

    /// Items staged for the next request.
    pub fn pending(&self) -> &[Value] {
        &self.pending
    }

    fn store_enabled(&self) -> bool {
        self.core.resolution().server_state && self.core.config.store_responses()
    }

    fn continuation(&self) -> Option<String> {
        if !self.store_enabled() || self.pending.is_empty() {
            return None;
        }
        self.last_response_id.clone()
    }

    /// Drop calls left unanswered by an interrupted round.
    ///
    /// The server still holds them under the last response, so continuation
    /// is abandoned and the next request replays the repaired log.
    fn repair_log(&mut self) {
        let dropped = drop_unanswered_calls(&mut self.items);
        if dropped > 0 {
            debug!(dropped, "Dropped unanswered function calls");
            self.last_response_id = None;
            self.pending.clear();
        }
    }

    async fn stream_once(
        &self,
        request: ResponsesRequest,
        cancel: &CancellationToken,
    ) -> Result<AssembledResponse> {
        let mut stream = self.core.deps.backend.responses.stream(request, cancel).await?;
        let mut assembler = StreamAssembler::new();
        while let Some(event) = stream.next().await {
            if assembler.push(event?)? {
                break;
            }
        }
        assembler.finish()
    }

    async fn exchange(
        &mut self,
        handler: &dyn MessageHandler,
        opt: &MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<Exchange> {
        let (model, max_tokens) = self.core.model_for(opt);
        let continuation = self.continuation();
        let input = match continuation {
            Some(_) => self.pending.clone(),
            None => replay_input(&self.items),
        };

        let mut request = ResponsesRequest {
            model: model.clone(),
            instructions: self.core.system_prompt(&model),
            input,
            tools: if opt.no_tool_use {
                Vec::new()
            } else {
                self.core.deps.tools.definitions()
            },
            previous_response_id: continuation.clone(),
            store: self.store_enabled(),
            max_output_tokens: self.core.resolution().server_state.then_some(max_tokens),
            reasoning_effort: self.core.reasoning_effort(&model),
        };

        debug!(
            model = %model,
            input_items = request.input.len(),
            continuation = continuation.is_some(),
            "Sending responses request"
        );

        let assembled = match self.stream_once(request.clone(), cancel).await {
            Err(e) if continuation.is_some() && is_invalid_continuation(&e) => {
                warn!(error = %e, "Continuation rejected, replaying full history");
                self.last_response_id = None;
                request.previous_response_id = None;
                request.input = replay_input(&self.items);
                self.stream_once(request, cancel).await?
            }
            other => other?,
        };

        self.pending.clear();
        if !assembled.response_id.is_empty() {
            self.last_response_id = Some(assembled.response_id.clone());
        }
        self.core.record_usage(&model, assembled.usage.token_counts());
        self.items.extend(assembled.output_items());

        for block in assembled.blocks() {
            match block {
                Block::Thinking(thinking) => handler.handle_thinking(&thinking),
                Block::Text(text) => handler.handle_text(&text),
            }
        }

        let calls = assembled.function_calls();
        if calls.is_empty() {
            return Ok(Exchange {
                text: assembled.text,
                tools_used: false,
            });
        }

        let ctx = self.core.tool_context(cancel);
        for call in calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            handler.handle_tool_use(&call.call_id, &call.name, &call.arguments);
            debug!(tool = %call.name, call_id = %call.call_id, "Executing tool");

            let output = self
                .core
                .deps
                .tools
                .execute(&ctx, &call.name, &call.arguments)
                .await;

            let item = function_call_output(&call.call_id, &output.assistant_facing);
            self.items.push(ConversationItem::input(item.clone()));
            self.pending.push(item);
            self.core
                .tool_results
                .insert(call.call_id.clone(), output.structured.clone());
            handler.handle_tool_result(&call.call_id, &call.name, &output);
        }

        Ok(Exchange {
            text: assembled.text,
            tools_used: true,
        })
    }

    async fn run_turns(
        &mut self,
        handler: &dyn MessageHandler,
        opt: &MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<String> {
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

fn is_invalid_continuation(err: &Error) -> bool {
    let text = err.to_string().to_lowercase();
    INVALID_CONTINUATION_PATTERNS
        .iter()
        .any(|pattern| text.contains(pattern))
}

#[async_trait]
impl Thread for ResponsesThread {
    async fn send_message(
        &mut self,
        message: &str,
        handler: &dyn MessageHandler,
        opt: MessageOpt,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let snapshot = opt.no_save_conversation.then(|| {
            (
                self.items.clone(),
                self.pending.clone(),
                self.last_response_id.clone(),
            )
        });

        let images = image_urls(&opt.images).await;
        let user = user_message_with_images(message, &images);
        self.items.push(ConversationItem::input(user.clone()));
        self.pending.push(user);

        let result = self.run_turns(handler, &opt, cancel).await;

        if let Some((items, pending, last_response_id)) = snapshot {
            self.items = items;
            self.pending = pending;
            self.last_response_id = last_response_id;
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
        let raw = serde_json::to_value(&self.items)?;
        let mut record = self.core.build_record(raw);
        if let Some(id) = &self.last_response_id {
            record
                .metadata
                .insert(LAST_RESPONSE_ID_KEY.to_string(), json!(id));
        }
        store.save(record)?;

        debug!(
            conversation_id = %self.core.conversation_id,
            items = self.items.len(),
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

        let mut items = parse_items(&record.raw_messages)?;
        let dropped = drop_unanswered_calls(&mut items);
        let last_response_id = if dropped > 0 {
            None
        } else {
            [LAST_RESPONSE_ID_KEY, LEGACY_LAST_RESPONSE_ID_KEY]
                .iter()
                .find_map(|key| record.metadata.get(*key).and_then(Value::as_str))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        };

        self.items = items;
        self.pending.clear();
        self.last_response_id = last_response_id;
        self.core.restore(record);

        info!(
            conversation_id = %self.core.conversation_id,
            items = self.items.len(),
            "Loaded conversation"
        );
        Ok(())
    }

    async fn short_summary(&self) -> String {
        if self.items.is_empty() {
            return String::new();
        }

        let mut summary_thread = ResponsesThread::from_core(self.core.detached());
        summary_thread.items = self.items.clone();

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
        if self.items.is_empty() {
            return Ok(());
        }

        let mut summary_thread = ResponsesThread::from_core(self.core.compaction_copy());
        summary_thread.items = self.items.clone();

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

        let before = self.items.len();
        self.items = vec![ConversationItem::input(user_message(&summary))];
        self.pending.clear();
        self.last_response_id = None;
        self.core.reset_after_compaction();
        info!(before, "Compacted conversation history");
        Ok(())
    }

    fn messages(&self) -> Result<Vec<Message>> {
        let raw = serde_json::to_value(&self.items)?;
        projection::extract_messages(
            &raw,
            ApiMode::Responses,
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
    use crate::agent::items::Direction;
    use crate::agent::llm::{EventStream, FakeChatClient, FakeResponsesClient, ResponsesClient};
    use crate::agent::stream::StreamEvent;
    use crate::agent::thread::testing::{core, harness, Harness};
    use crate::persistence::{ConversationRecord, ConversationStore, API_MODE_KEY, RESPONSES_PROVIDER};
    use std::sync::Arc;

    fn thread_with(scripts: Vec<Vec<StreamEvent>>) -> (ResponsesThread, Harness) {
        let h = harness(FakeChatClient::default(), FakeResponsesClient::new(scripts));
        let thread = ResponsesThread::from_core(core(ApiMode::Responses, h.deps.clone()));
        (thread, h)
    }

    fn weather_scripts() -> Vec<Vec<StreamEvent>> {
        vec![
            FakeResponsesClient::tool_call_script("resp_1", "call_1", "get_weather", r#"{"city":"Paris"}"#),
            FakeResponsesClient::text_script("resp_2", &["It's ", "sunny!"]),
        ]
    }

    async fn send(thread: &mut ResponsesThread, text: &str, recorder: &Recorder) -> Result<String> {
        thread
            .send_message(text, recorder, MessageOpt::default(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_deltas_are_buffered_into_one_block() {
        let (mut thread, _) = thread_with(vec![FakeResponsesClient::text_script("resp_1", &["Hel", "lo", "!"])]);
        let recorder = Recorder::default();

        let output = send(&mut thread, "hi", &recorder).await.unwrap();

        assert_eq!(output, "Hello!");
        assert_eq!(
            recorder.events(),
            vec![Event::Text("Hello!".to_string()), Event::Done]
        );
    }

    #[tokio::test]
    async fn test_weather_scenario() {
        let (mut thread, h) = thread_with(weather_scripts());
        let recorder = Recorder::default();

        let output = send(&mut thread, "What's the weather?", &recorder).await.unwrap();

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

        let kinds: Vec<(Direction, Option<&str>)> =
            thread.items().iter().map(|i| (i.direction, i.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                (Direction::Input, Some("message")),
                (Direction::Output, Some("function_call")),
                (Direction::Input, Some("function_call_output")),
                (Direction::Output, Some("message")),
            ]
        );

        let requests = h.responses.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].previous_response_id, None);
        assert_eq!(requests[0].input.len(), 1);
        assert_eq!(requests[0].instructions, "You are a test agent.");
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(requests[1].input.len(), 1);
        assert_eq!(requests[1].input[0]["type"], "function_call_output");
        assert_eq!(requests[1].input[0]["output"], "Sunny, 25C");

        assert_eq!(thread.last_response_id(), Some("resp_2"));
        assert!(thread.pending().is_empty());
    }

    #[tokio::test]
    async fn test_next_turn_continues_from_last_response() {
        let (mut thread, h) = thread_with(vec![
            FakeResponsesClient::text_script("resp_1", &["one"]),
            FakeResponsesClient::text_script("resp_2", &["two"]),
        ]);
        let recorder = Recorder::default();
        send(&mut thread, "first", &recorder).await.unwrap();
        send(&mut thread, "second", &recorder).await.unwrap();

        let requests = h.responses.requests();
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("resp_1"));
        assert_eq!(requests[1].input.len(), 1);
        assert_eq!(requests[1].input[0]["content"][0]["text"], "second");
    }

    #[tokio::test]
    async fn test_rejected_continuation_replays_history() {
        let (mut thread, h) = thread_with(vec![
            FakeResponsesClient::text_script("resp_1", &["one"]),
            vec![StreamEvent::Error {
                code: "previous_response_not_found".to_string(),
                message: "Previous response with id 'resp_1' not found.".to_string(),
            }],
            FakeResponsesClient::text_script("resp_2", &["two"]),
        ]);
        let recorder = Recorder::default();
        send(&mut thread, "first", &recorder).await.unwrap();
        let output = send(&mut thread, "second", &recorder).await.unwrap();

        assert_eq!(output, "two");
        let requests = h.responses.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].previous_response_id, None);
        assert_eq!(requests[2].input.len(), 3);
    }

    #[tokio::test]
    async fn test_stateless_platform_replays_history() {
        let h = harness(
            FakeChatClient::default(),
            FakeResponsesClient::new(vec![
                FakeResponsesClient::text_script("resp_1", &["one"]),
                FakeResponsesClient::text_script("resp_2", &["two"]),
            ]),
        );
        let mut config = crate::agent::thread::testing::config(ApiMode::Responses);
        if let Some(openai) = config.openai.as_mut() {
            openai.platform = "codex".to_string();
        }
        let resolution = h.deps.resolver.resolve(&config);
        let mut thread = ResponsesThread::from_core(ThreadCore::new(
            config,
            Arc::new(resolution),
            h.deps.clone(),
            crate::agent::UsageTracker::new(),
        ));

        let recorder = Recorder::default();
        send(&mut thread, "first", &recorder).await.unwrap();
        send(&mut thread, "second", &recorder).await.unwrap();

        let requests = h.responses.requests();
        assert!(!requests[1].store);
        assert_eq!(requests[1].previous_response_id, None);
        assert_eq!(requests[1].max_output_tokens, None);
        assert_eq!(requests[1].input.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_event_aborts_turn() {
        let (mut thread, _) = thread_with(vec![vec![
            StreamEvent::OutputTextDelta {
                delta: "partial".to_string(),
            },
            StreamEvent::Failed {
                code: "server_error".to_string(),
                message: "overloaded".to_string(),
            },
        ]]);
        let recorder = Recorder::default();

        let err = send(&mut thread, "hi", &recorder).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Response API error: code=server_error, message=overloaded"
        );
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn test_stream_without_completion_is_an_error() {
        let (mut thread, _) = thread_with(vec![vec![StreamEvent::OutputTextDelta {
            delta: "dangling".to_string(),
        }]]);
        let err = send(&mut thread, "hi", &Recorder::default()).await.unwrap_err();
        assert!(matches!(err, Error::StreamIncomplete));
    }

    /// Responses client that cancels the turn once a stream has been handed out.
    struct CancellingClient {
        inner: FakeResponsesClient,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ResponsesClient for CancellingClient {
        async fn stream(&self, request: ResponsesRequest, cancel: &CancellationToken) -> Result<EventStream> {
            let stream = self.inner.stream(request, cancel).await;
            self.cancel.cancel();
            stream
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_tool_round_leaves_no_unanswered_calls() {
        let cancel = CancellationToken::new();
        let h = harness(FakeChatClient::default(), FakeResponsesClient::default());
        let mut deps = h.deps.clone();
        let client: Arc<dyn ResponsesClient> = Arc::new(CancellingClient {
            inner: FakeResponsesClient::new(vec![FakeResponsesClient::tool_call_script(
                "resp_1", "call_1", "get_weather", "{}",
            )]),
            cancel: cancel.clone(),
        });
        deps.backend.responses = client;
        let mut thread = ResponsesThread::from_core(core(ApiMode::Responses, deps));

        let output = thread
            .send_message("weather", &Recorder::default(), MessageOpt::default(), &cancel)
            .await
            .unwrap();

        assert_eq!(output, "");
        assert!(thread.items().iter().all(|i| i.kind() != Some("function_call")));
        assert_eq!(thread.last_response_id(), None);
        assert!(thread.pending().is_empty());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let mut scripts = weather_scripts();
        scripts.push(FakeResponsesClient::text_script("resp_3", &["Weather check"]));
        let (mut thread, h) = thread_with(scripts);
        thread.enable_persistence(true);
        send(&mut thread, "What's the weather?", &Recorder::default()).await.unwrap();
        assert_eq!(thread.summary(), "Weather check");

        let record = h.store.load(thread.conversation_id()).unwrap();
        assert_eq!(record.metadata[API_MODE_KEY], "responses");
        assert_eq!(record.metadata[LAST_RESPONSE_ID_KEY], "resp_2");

        let mut restored = ResponsesThread::from_core(core(ApiMode::Responses, h.deps.clone()));
        restored.set_conversation_id(thread.conversation_id());
        restored.enable_persistence(true);
        restored.load_conversation().await.unwrap();

        assert_eq!(restored.items(), thread.items());
        assert_eq!(restored.usage(), thread.usage());
        assert_eq!(restored.structured_tool_results(), thread.structured_tool_results());
        assert_eq!(restored.last_response_id(), Some("resp_2"));

        let mut again = restored.items().to_vec();
        assert_eq!(drop_unanswered_calls(&mut again), 0);
    }

    #[tokio::test]
    async fn test_false_discriminator_is_a_mismatch() {
        let (mut thread, h) = thread_with(vec![FakeResponsesClient::text_script("resp_1", &["ok"])]);
        thread.enable_persistence(true);
        thread.core.summary = "set".to_string();
        send(&mut thread, "hi", &Recorder::default()).await.unwrap();

        let mut record = h.store.load(thread.conversation_id()).unwrap();
        record
            .metadata
            .insert(API_MODE_KEY.to_string(), json!("chat_completions"));
        h.store.save(record).unwrap();

        let mut reloaded = ResponsesThread::from_core(core(ApiMode::Responses, h.deps.clone()));
        reloaded.set_conversation_id(thread.conversation_id());
        reloaded.enable_persistence(true);
        let err = reloaded.load_conversation().await.unwrap_err();
        assert!(matches!(err, Error::ApiModeMismatch { .. }));
        assert!(reloaded.items().is_empty());
    }

    #[tokio::test]
    async fn test_load_legacy_flat_items() {
        let (mut thread, h) = thread_with(Vec::new());
        let mut record = ConversationRecord::new(thread.conversation_id());
        record.raw_messages = json!([
            {"type": "message", "role": "user", "content": "hi"},
            {"type": "reasoning", "role": "assistant", "content": "pondering"},
            {"type": "message", "role": "assistant", "content": "hello"}
        ]);
        record
            .metadata
            .insert(LEGACY_LAST_RESPONSE_ID_KEY.to_string(), json!("resp_old"));
        h.store.save(record).unwrap();

        thread.enable_persistence(true);
        thread.load_conversation().await.unwrap();

        assert_eq!(thread.items().len(), 3);
        assert_eq!(thread.items()[0].direction, Direction::Input);
        assert_eq!(thread.items()[1].direction, Direction::Output);
        assert_eq!(thread.last_response_id(), Some("resp_old"));

        let flat = thread.messages().unwrap();
        assert_eq!(flat[0].content, "hi");
        assert_eq!(flat[1].content, "💭 Thinking:\npondering");
        assert_eq!(flat[2].content, "hello");
    }

    #[tokio::test]
    async fn test_no_save_conversation_restores_items() {
        let (mut thread, _) = thread_with(vec![FakeResponsesClient::text_script("resp_1", &["tmp"])]);
        let opt = MessageOpt {
            no_save_conversation: true,
            ..MessageOpt::default()
        };
        thread
            .send_message("scratch", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();
        assert!(thread.items().is_empty());
        assert!(thread.pending().is_empty());
        assert_eq!(thread.last_response_id(), None);
    }

    #[test]
    fn test_invalid_continuation_detection() {
        assert!(is_invalid_continuation(&Error::ResponseFailed {
            code: "previous_response_not_found".to_string(),
            message: String::new(),
        }));
        assert!(!is_invalid_continuation(&Error::ResponseFailed {
            code: "rate_limit_exceeded".to_string(),
            message: "slow down".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_load_tagged_streaming_record() {
        let (mut thread, h) = thread_with(Vec::new());
        let mut record = ConversationRecord::new(thread.conversation_id());
        record.provider = RESPONSES_PROVIDER.to_string();
        record.raw_messages = json!([
            {"type": "message", "role": "user", "content": "ping"},
            {"type": "message", "role": "assistant", "content": "pong"}
        ]);
        record
            .metadata
            .insert(LEGACY_LAST_RESPONSE_ID_KEY.to_string(), json!("resp_legacy"));
        h.store.save(record).unwrap();

        thread.enable_persistence(true);
        thread.load_conversation().await.unwrap();

        assert_eq!(thread.items().len(), 2);
        assert_eq!(thread.last_response_id(), Some("resp_legacy"));
        let flat = thread.messages().unwrap();
        assert_eq!(flat[0].content, "ping");
        assert_eq!(flat[1].content, "pong");
    }

    #[tokio::test]
    async fn test_summary_refreshed_on_every_turn() {
        let (mut thread, h) = thread_with(vec![
            FakeResponsesClient::text_script("resp_1", &["one"]),
            FakeResponsesClient::text_script("resp_s1", &["First topic"]),
            FakeResponsesClient::text_script("resp_2", &["two"]),
            FakeResponsesClient::text_script("resp_s2", &["Second topic"]),
        ]);
        thread.enable_persistence(true);

        send(&mut thread, "a", &Recorder::default()).await.unwrap();
        assert_eq!(thread.summary(), "First topic");
        send(&mut thread, "b", &Recorder::default()).await.unwrap();
        assert_eq!(thread.summary(), "Second topic");
        assert_eq!(h.store.load(thread.conversation_id()).unwrap().summary, "Second topic");
    }

    #[tokio::test]
    async fn test_images_ride_on_the_user_item() {
        let (mut thread, h) = thread_with(vec![FakeResponsesClient::text_script("resp_1", &["A cat."])]);
        let opt = MessageOpt {
            images: vec!["https://example.com/cat.png".to_string()],
            ..MessageOpt::default()
        };
        thread
            .send_message("What is this?", &Recorder::default(), opt, &CancellationToken::new())
            .await
            .unwrap();

        let input = &h.responses.requests()[0].input;
        assert_eq!(input[0]["content"][0]["type"], "input_image");
        assert_eq!(input[0]["content"][0]["image_url"], "https://example.com/cat.png");
        assert_eq!(input[0]["content"][1]["text"], "What is this?");
    }

    #[tokio::test]
    async fn test_compact_context_replaces_items() {
        let (mut thread, h) = thread_with(vec![
            FakeResponsesClient::text_script("resp_1", &["hello"]),
            FakeResponsesClient::text_script("resp_c", &["User greeted the agent."]),
            FakeResponsesClient::text_script("resp_2", &["ok"]),
        ]);
        send(&mut thread, "hi", &Recorder::default()).await.unwrap();
        assert_eq!(thread.last_response_id(), Some("resp_1"));

        thread.compact_context(&CancellationToken::new()).await.unwrap();

        assert_eq!(thread.items().len(), 1);
        assert_eq!(thread.items()[0].direction, Direction::Input);
        assert_eq!(thread.items()[0].item["content"][0]["text"], "User greeted the agent.");
        assert_eq!(thread.last_response_id(), None);
        assert!(thread.pending().is_empty());
        assert_eq!(thread.usage().current_context_window, 0);

        send(&mut thread, "next", &Recorder::default()).await.unwrap();

        let requests = h.responses.requests();
        assert!(requests[1].tools.is_empty());
        assert_eq!(
            requests[1].input.last().unwrap()["content"][0]["text"],
            COMPACT_PROMPT
        );
        assert_eq!(requests[2].previous_response_id, None);
        assert_eq!(requests[2].input.len(), 2);
        assert_eq!(requests[2].input[1]["content"][0]["text"], "next");
    }

    #[tokio::test]
    async fn test_auto_compact_runs_before_request() {
        let (mut thread, h) = thread_with(vec![
            FakeResponsesClient::text_script("resp_c", &["Earlier we discussed the build."]),
            FakeResponsesClient::text_script("resp_1", &["Continuing."]),
        ]);
        thread.items = vec![ConversationItem::input(user_message("fix the build"))];
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
        let requests = h.responses.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].input.len(), 1);
        assert_eq!(
            requests[1].input[0]["content"][0]["text"],
            "Earlier we discussed the build."
        );
        assert_eq!(thread.last_response_id(), Some("resp_1"));
    }
}
