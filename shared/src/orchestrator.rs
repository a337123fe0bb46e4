//! Streaming tool-call orchestration for the chat endpoint.
//!
//! A chat run relays the model's streamed output to the caller as NDJSON
//! while collecting `search_case_law` calls. Searches run only after the
//! upstream stream has finished, one at a time in the order the model asked
//! for them, and each result block is appended to the output. A run moves
//! through `Idle -> Streaming -> Draining -> Closed`; failing to get the first
//! chunk ends it in `Errored` before anything is written.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::case_law::{format_results_block, CaseLawSearch, SearchResult};
use crate::generation::{ChunkStream, GenerationBackend, GenerationRequest};
use crate::http::public_message;
use crate::models::{ChatRequest, StreamChunk, ToolInvocation};
use crate::tools::{chat_tools, instruction_profile, search_query, SEARCH_CASE_LAW};
use crate::{Config, Error, Result};

/// Tunables for a chat run.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Upper bound on waiting for each upstream chunk
    pub chunk_timeout: Duration,
    /// Upper bound on each deferred search
    pub search_timeout: Duration,
    /// Search each distinct query once per run
    pub deduplicate_searches: bool,
    /// Write an `error` record when the upstream fails after output began
    pub emit_error_marker: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(60),
            search_timeout: Duration::from_secs(30),
            deduplicate_searches: false,
            emit_error_marker: true,
        }
    }
}

impl From<&Config> for OrchestratorOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunk_timeout: config.chunk_timeout,
            search_timeout: config.search_timeout,
            deduplicate_searches: config.deduplicate_searches,
            emit_error_marker: config.emit_stream_error_marker,
        }
    }
}

/// One NDJSON record written to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputRecord {
    /// An upstream chunk, forwarded as received
    Chunk {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(rename = "toolCalls", skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolInvocation>,
    },
    /// Outcome of one deferred case-law search
    SearchResults {
        query: String,
        text: String,
        results: Vec<SearchResult>,
    },
    /// Terminal marker after a mid-stream upstream failure
    Error { message: String },
}

impl From<StreamChunk> for OutputRecord {
    fn from(chunk: StreamChunk) -> Self {
        OutputRecord::Chunk {
            text: chunk.text,
            tool_calls: chunk.tool_calls,
        }
    }
}

impl OutputRecord {
    fn search_results(query: String, results: Vec<SearchResult>) -> Self {
        let text = format_results_block(&query, &results);
        OutputRecord::SearchResults {
            query,
            text,
            results,
        }
    }

    /// Serialized record terminated by a newline.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Destination of a chat run's output.
#[async_trait]
pub trait OutputSink: Send {
    /// Write one line. Returns `false` once the receiver is gone.
    async fn send(&mut self, line: String) -> bool;

    /// Resolves when the receiver has gone away.
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

#[async_trait]
impl OutputSink for mpsc::Sender<String> {
    async fn send(&mut self, line: String) -> bool {
        mpsc::Sender::send(&*self, line).await.is_ok()
    }

    async fn closed(&mut self) {
        mpsc::Sender::closed(&*self).await
    }
}

#[async_trait]
impl OutputSink for lambda_runtime::streaming::Sender {
    async fn send(&mut self, line: String) -> bool {
        self.send_data(line.into()).await.is_ok()
    }
}

/// Lifecycle of a chat run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Draining,
    Closed,
    Errored,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    UpstreamFailed,
    Cancelled,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub chunks_forwarded: usize,
    pub searches_executed: usize,
    pub outcome: Outcome,
}

/// Relays chat generations and fulfils their case-law searches.
pub struct Orchestrator {
    backend: Arc<dyn GenerationBackend>,
    search: Arc<dyn CaseLawSearch>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        search: Arc<dyn CaseLawSearch>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            backend,
            search,
            options,
        }
    }

    /// Generation request for a chat: conversation, instruction profile, tools.
    pub fn build_request(request: &ChatRequest) -> GenerationRequest {
        GenerationRequest {
            conversation: request.messages.clone(),
            instruction: Some(instruction_profile(request)),
            tools: chat_tools(),
            grounded_search: false,
            temperature: None,
        }
    }

    /// Open the upstream stream and wait for its first item.
    ///
    /// An error here means nothing has been written and the caller should
    /// answer with a regular error response.
    pub async fn open(&self, request: &ChatRequest) -> Result<ChatSession> {
        let generation = Self::build_request(request);
        let chunk_timeout = self.options.chunk_timeout;

        let opened = timeout(chunk_timeout, self.backend.stream(&generation)).await;
        let mut upstream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Chat upstream failed to open: {}", e);
                return Err(errored(e));
            }
            Err(_) => {
                error!("Chat upstream did not open within {:?}", chunk_timeout);
                return Err(errored(Error::Timeout("generation stream did not open".to_string())));
            }
        };

        // Skip empty chunks until the first one with output.
        let first = loop {
            match timeout(chunk_timeout, upstream.next()).await {
                Ok(Some(Ok(chunk))) if has_output(&chunk) => break Some(chunk),
                Ok(Some(Ok(_))) => debug!("Skipping empty chunk before first output"),
                Ok(None) => break None,
                Ok(Some(Err(e))) => {
                    error!("Chat upstream failed before the first chunk: {}", e);
                    return Err(errored(e));
                }
                Err(_) => {
                    error!("No chunk from chat upstream within {:?}", chunk_timeout);
                    return Err(errored(Error::Timeout("no response from generation service".to_string())));
                }
            }
        };

        debug!("Chat phase: {:?} -> {:?}", Phase::Idle, Phase::Streaming);

        Ok(ChatSession {
            upstream,
            first,
            search: Arc::clone(&self.search),
            options: self.options.clone(),
            pending: Vec::new(),
            seen_queries: HashSet::new(),
            phase: Phase::Streaming,
        })
    }
}

fn has_output(chunk: &StreamChunk) -> bool {
    chunk.text.as_deref().is_some_and(|t| !t.is_empty()) || !chunk.tool_calls.is_empty()
}

fn errored(e: Error) -> Error {
    debug!("Chat phase: {:?} -> {:?}", Phase::Idle, Phase::Errored);
    e
}

/// An opened chat run, ready to write its output.
pub struct ChatSession {
    upstream: ChunkStream,
    first: Option<StreamChunk>,
    search: Arc<dyn CaseLawSearch>,
    options: OrchestratorOptions,
    pending: Vec<String>,
    seen_queries: HashSet<String>,
    phase: Phase,
}

enum Next {
    Chunk(StreamChunk),
    End,
    Failed(Error),
    Cancelled,
}

impl ChatSession {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, to: Phase) {
        debug!("Chat phase: {:?} -> {:?}", self.phase, to);
        self.phase = to;
    }

    /// Forward the stream, then drain pending searches.
    pub async fn run<S: OutputSink + ?Sized>(mut self, sink: &mut S) -> RunSummary {
        let mut summary = RunSummary {
            chunks_forwarded: 0,
            searches_executed: 0,
            outcome: Outcome::Completed,
        };

        let mut buffered = self.first.take();
        loop {
            let next = match buffered.take() {
                Some(chunk) => Next::Chunk(chunk),
                None => self.next_chunk(sink).await,
            };

            let chunk = match next {
                Next::Chunk(chunk) => chunk,
                Next::End => break,
                Next::Cancelled => return self.cancelled(summary),
                Next::Failed(e) => {
                    warn!(
                        "Chat upstream failed mid-stream, dropping {} pending searches: {}",
                        self.pending.len(),
                        e
                    );
                    if self.options.emit_error_marker {
                        let record = OutputRecord::Error {
                            message: public_message(&e),
                        };
                        Self::write(sink, &record).await;
                    }
                    self.transition(Phase::Closed);
                    summary.outcome = Outcome::UpstreamFailed;
                    return summary;
                }
            };

            self.collect_searches(&chunk.tool_calls);

            if !has_output(&chunk) {
                continue;
            }
            if !Self::write(sink, &OutputRecord::from(chunk)).await {
                return self.cancelled(summary);
            }
            summary.chunks_forwarded += 1;
        }

        self.transition(Phase::Draining);
        let pending = std::mem::take(&mut self.pending);
        info!("Draining {} case-law searches", pending.len());

        for query in pending {
            let results = tokio::select! {
                biased;
                _ = sink.closed() => return self.cancelled(summary),
                results = Self::execute_search(&self.search, self.options.search_timeout, &query) => results,
            };
            summary.searches_executed += 1;

            let record = OutputRecord::search_results(query, results);
            if !Self::write(sink, &record).await {
                return self.cancelled(summary);
            }
        }

        self.transition(Phase::Closed);
        summary
    }

    async fn next_chunk<S: OutputSink + ?Sized>(&mut self, sink: &mut S) -> Next {
        let chunk_timeout = self.options.chunk_timeout;
        tokio::select! {
            biased;
            _ = sink.closed() => Next::Cancelled,
            next = timeout(chunk_timeout, self.upstream.next()) => match next {
                Ok(Some(Ok(chunk))) => Next::Chunk(chunk),
                Ok(Some(Err(e))) => Next::Failed(e),
                Ok(None) => Next::End,
                Err(_) => Next::Failed(Error::Timeout(format!(
                    "no chunk received within {:?}",
                    chunk_timeout
                ))),
            },
        }
    }

    fn collect_searches(&mut self, tool_calls: &[ToolInvocation]) {
        for call in tool_calls.iter().filter(|c| c.name == SEARCH_CASE_LAW) {
            let query = search_query(call);
            if self.options.deduplicate_searches && !self.seen_queries.insert(query.clone()) {
                debug!("Skipping repeated case-law search: {}", query);
                continue;
            }
            debug!("Deferring case-law search: {}", query);
            self.pending.push(query);
        }
    }

    async fn execute_search(
        search: &Arc<dyn CaseLawSearch>,
        search_timeout: Duration,
        query: &str,
    ) -> Vec<SearchResult> {
        if query.is_empty() {
            warn!("search_case_law call without a query");
            return Vec::new();
        }

        match timeout(search_timeout, search.search(query)).await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                warn!("Case-law search failed for {:?}: {}", query, e);
                Vec::new()
            }
            Err(_) => {
                warn!("Case-law search timed out for {:?}", query);
                Vec::new()
            }
        }
    }

    async fn write<S: OutputSink + ?Sized>(sink: &mut S, record: &OutputRecord) -> bool {
        match record.to_line() {
            Ok(line) => sink.send(line).await,
            Err(e) => {
                error!("Failed to serialize chat record: {}", e);
                true
            }
        }
    }

    fn cancelled(mut self, mut summary: RunSummary) -> RunSummary {
        info!("Chat receiver disconnected, stopping");
        self.transition(Phase::Closed);
        summary.outcome = Outcome::Cancelled;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_law::{rank_results, RawSearchResult, NO_PRECEDENTS_FOUND};
    use crate::generation::Generated;
    use crate::models::ChatMessage;
    use futures::stream;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Step {
        Chunk(StreamChunk),
        Fail(&'static str),
        Hang,
    }

    struct ScriptedBackend {
        steps: Vec<Step>,
        fail_open: bool,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps,
                fail_open: false,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Generated> {
            Err(Error::Internal("not used".to_string()))
        }

        async fn stream(&self, request: &GenerationRequest) -> Result<ChunkStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(request.tools.len(), 3);
            if self.fail_open {
                return Err(Error::Upstream("503 Service Unavailable".to_string()));
            }

            let mut items = Vec::new();
            let mut hang = false;
            for step in &self.steps {
                match step {
                    Step::Chunk(chunk) => items.push(Ok(chunk.clone())),
                    Step::Fail(message) => items.push(Err(Error::Upstream(message.to_string()))),
                    Step::Hang => {
                        hang = true;
                        break;
                    }
                }
            }

            let head = stream::iter(items);
            if hang {
                Ok(head.chain(stream::pending()).boxed())
            } else {
                Ok(head.boxed())
            }
        }
    }

    #[derive(Default)]
    struct RecordingSearch {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CaseLawSearch for RecordingSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
            self.queries.lock().unwrap().push(query.to_string());
            if query.contains("stall") {
                futures::future::pending::<()>().await;
            }
            if query.contains("fail") {
                return Err(Error::Upstream("search backend down".to_string()));
            }
            Ok(rank_results(vec![
                RawSearchResult {
                    title: Some("Yargıtay 3. HD".to_string()),
                    relevance_score: Some(Value::Null),
                    ..RawSearchResult::default()
                },
                RawSearchResult {
                    title: Some("Yargıtay 2. HD".to_string()),
                    relevance_score: Some(Value::Null),
                    ..RawSearchResult::default()
                },
            ]))
        }
    }

    fn search_call(query: &str) -> ToolInvocation {
        let mut args = Map::new();
        args.insert("query".to_string(), Value::from(query));
        ToolInvocation::new(SEARCH_CASE_LAW, args)
    }

    fn chat_request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::user("Kiracım kirayı ödemiyor, ne yapabilirim?")],
            case_summary: None,
            keywords: None,
            research_summary: None,
        }
    }

    fn options() -> OrchestratorOptions {
        OrchestratorOptions {
            chunk_timeout: Duration::from_millis(200),
            search_timeout: Duration::from_millis(200),
            ..OrchestratorOptions::default()
        }
    }

    async fn run_chat(
        backend: Arc<ScriptedBackend>,
        search: Arc<RecordingSearch>,
        options: OrchestratorOptions,
    ) -> (RunSummary, Vec<Value>) {
        let orchestrator = Orchestrator::new(backend, search, options);
        let session = orchestrator.open(&chat_request()).await.unwrap();
        let (mut tx, mut rx) = mpsc::channel::<String>(64);
        let summary = session.run(&mut tx).await;
        drop(tx);

        let mut records = Vec::new();
        while let Some(line) = rx.recv().await {
            assert!(line.ends_with('\n'));
            assert_eq!(line.matches('\n').count(), 1);
            records.push(serde_json::from_str(line.trim_end()).unwrap());
        }
        (summary, records)
    }

    #[tokio::test]
    async fn test_no_tool_calls_forwards_narrative_only() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::text("Kira alacağı için ")),
            Step::Chunk(StreamChunk::text("icra takibi başlatabilirsiniz.")),
        ]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend.clone(), search.clone(), options()).await;

        assert_eq!(summary.outcome, Outcome::Completed);
        assert_eq!(summary.chunks_forwarded, 2);
        assert_eq!(summary.searches_executed, 0);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r["type"] == "chunk"));
        assert_eq!(records[1]["text"], "icra takibi başlatabilirsiniz.");
        assert!(search.queries.lock().unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_search_blocks_follow_narrative_in_discovery_order() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::text("Emsal kararlara bakıyorum.")),
            Step::Chunk(StreamChunk::tool_call(search_call("temerrüt tahliye"))),
            Step::Chunk(StreamChunk::text("Ayrıca kira tespitine bakalım.")),
            Step::Chunk(StreamChunk::tool_call(search_call("kira tespiti"))),
            Step::Chunk(StreamChunk::text("Sonuçlar aşağıda.")),
        ]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        let kinds: Vec<&str> = records.iter().map(|r| r["type"].as_str().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["chunk", "chunk", "chunk", "chunk", "chunk", "search_results", "search_results"]
        );
        assert_eq!(records[5]["query"], "temerrüt tahliye");
        assert_eq!(records[6]["query"], "kira tespiti");
        assert_eq!(records[1]["toolCalls"][0]["name"], SEARCH_CASE_LAW);
        assert_eq!(summary.searches_executed, 2);
        assert_eq!(
            *search.queries.lock().unwrap(),
            vec!["temerrüt tahliye".to_string(), "kira tespiti".to_string()]
        );
    }

    #[tokio::test]
    async fn test_duplicate_queries_are_searched_twice() {
        let query = "kira sözleşmesi feshi";
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::tool_call(search_call(query))),
            Step::Chunk(StreamChunk::tool_call(search_call(query))),
        ]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        assert_eq!(summary.searches_executed, 2);
        assert_eq!(search.queries.lock().unwrap().len(), 2);
        let blocks: Vec<&Value> = records.iter().filter(|r| r["type"] == "search_results").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(|b| b["query"] == query));
    }

    #[tokio::test]
    async fn test_deduplication_when_enabled() {
        let query = "kira sözleşmesi feshi";
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk {
            text: None,
            tool_calls: vec![search_call(query), search_call(query)],
        })]);
        let search = Arc::new(RecordingSearch::default());
        let opts = OrchestratorOptions {
            deduplicate_searches: true,
            ..options()
        };
        let (summary, _) = run_chat(backend, search.clone(), opts).await;
        assert_eq!(summary.searches_executed, 1);
        assert_eq!(search.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_null_scores_rendered_as_100_and_92() {
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk::tool_call(search_call("kira")))]);
        let search = Arc::new(RecordingSearch::default());
        let (_, records) = run_chat(backend, search, options()).await;

        let block = &records[1];
        assert_eq!(block["results"][0]["title"], "Yargıtay 3. HD");
        assert_eq!(block["results"][0]["relevanceScore"], 100);
        assert_eq!(block["results"][1]["title"], "Yargıtay 2. HD");
        assert_eq!(block["results"][1]["relevanceScore"], 92);
        let text = block["text"].as_str().unwrap();
        assert!(text.find("Yargıtay 3. HD").unwrap() < text.find("Yargıtay 2. HD").unwrap());
    }

    #[tokio::test]
    async fn test_failed_search_does_not_stop_siblings() {
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk {
            text: Some("İki arama yapıyorum.".to_string()),
            tool_calls: vec![search_call("fail please"), search_call("kira")],
        })]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        assert_eq!(summary.outcome, Outcome::Completed);
        assert_eq!(summary.searches_executed, 2);
        assert_eq!(records[1]["query"], "fail please");
        assert!(records[1]["text"].as_str().unwrap().contains(NO_PRECEDENTS_FOUND));
        assert_eq!(records[1]["results"].as_array().unwrap().len(), 0);
        assert_eq!(records[2]["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_query_yields_empty_block_without_search() {
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk::tool_call(ToolInvocation::new(
            SEARCH_CASE_LAW,
            Map::new(),
        )))]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        assert_eq!(summary.outcome, Outcome::Completed);
        assert!(search.queries.lock().unwrap().is_empty());
        assert_eq!(records[1]["type"], "search_results");
        assert!(records[1]["text"].as_str().unwrap().contains(NO_PRECEDENTS_FOUND));
    }

    #[tokio::test]
    async fn test_other_tools_are_forwarded_not_executed() {
        let mut args = Map::new();
        args.insert("keywords".to_string(), serde_json::json!(["tahliye", "temerrüt"]));
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk::tool_call(ToolInvocation::new(
            "add_keywords",
            args,
        )))]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        assert_eq!(summary.searches_executed, 0);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["toolCalls"][0]["name"], "add_keywords");
        assert_eq!(records[0]["toolCalls"][0]["args"]["keywords"][1], "temerrüt");
    }

    #[tokio::test]
    async fn test_open_fails_before_first_chunk() {
        let backend = ScriptedBackend::new(vec![Step::Fail("quota exceeded")]);
        let orchestrator = Orchestrator::new(backend, Arc::new(RecordingSearch::default()), options());
        let err = orchestrator.open(&chat_request()).await.err().unwrap();
        assert!(matches!(err, Error::Upstream(_)));

        let backend = Arc::new(ScriptedBackend {
            steps: Vec::new(),
            fail_open: true,
            calls: AtomicUsize::new(0),
        });
        let orchestrator = Orchestrator::new(backend, Arc::new(RecordingSearch::default()), options());
        assert!(orchestrator.open(&chat_request()).await.is_err());
    }

    #[tokio::test]
    async fn test_open_times_out_without_first_chunk() {
        let backend = ScriptedBackend::new(vec![Step::Hang]);
        let orchestrator = Orchestrator::new(backend, Arc::new(RecordingSearch::default()), options());
        let err = orchestrator.open(&chat_request()).await.err().unwrap();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_writes_error_marker() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::text("Başlıyorum")),
            Step::Chunk(StreamChunk::tool_call(search_call("kira"))),
            Step::Fail("connection reset"),
        ]);
        let search = Arc::new(RecordingSearch::default());
        let (summary, records) = run_chat(backend, search.clone(), options()).await;

        assert_eq!(summary.outcome, Outcome::UpstreamFailed);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2]["type"], "error");
        assert_eq!(records[2]["message"], public_message(&Error::Upstream(String::new())));
        assert!(!records[2]["message"].as_str().unwrap().contains("connection reset"));
        assert!(search.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_first_chunk_then_failure_fails_open() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::default()),
            Step::Chunk(StreamChunk::text("")),
            Step::Fail("quota exceeded"),
        ]);
        let orchestrator = Orchestrator::new(backend, Arc::new(RecordingSearch::default()), options());
        let err = orchestrator.open(&chat_request()).await.err().unwrap();
        assert!(matches!(err, Error::Upstream(_)));
    }

    #[tokio::test]
    async fn test_empty_leading_chunks_are_skipped() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::default()),
            Step::Chunk(StreamChunk::text("Merhaba")),
        ]);
        let (summary, records) = run_chat(backend, Arc::new(RecordingSearch::default()), options()).await;
        assert_eq!(summary.chunks_forwarded, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["text"], "Merhaba");
    }

    #[tokio::test]
    async fn test_timed_out_search_does_not_stop_siblings() {
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk {
            text: Some("İki arama yapıyorum.".to_string()),
            tool_calls: vec![search_call("stall kira"), search_call("kira")],
        })]);
        let search = Arc::new(RecordingSearch::default());
        let opts = OrchestratorOptions {
            search_timeout: Duration::from_millis(50),
            ..options()
        };
        let (summary, records) = run_chat(backend, search.clone(), opts).await;

        assert_eq!(summary.outcome, Outcome::Completed);
        assert_eq!(summary.searches_executed, 2);
        assert_eq!(records[1]["query"], "stall kira");
        assert!(records[1]["text"].as_str().unwrap().contains(NO_PRECEDENTS_FOUND));
        assert_eq!(records[1]["results"].as_array().unwrap().len(), 0);
        assert_eq!(records[2]["query"], "kira");
        assert_eq!(records[2]["results"].as_array().unwrap().len(), 2);
        assert_eq!(search.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_silent_when_marker_disabled() {
        let backend = ScriptedBackend::new(vec![Step::Chunk(StreamChunk::text("Başlıyorum")), Step::Hang]);
        let opts = OrchestratorOptions {
            emit_error_marker: false,
            chunk_timeout: Duration::from_millis(50),
            ..options()
        };
        let (summary, records) = run_chat(backend, Arc::new(RecordingSearch::default()), opts).await;

        assert_eq!(summary.outcome, Outcome::UpstreamFailed);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["type"], "chunk");
    }

    #[tokio::test]
    async fn test_disconnected_receiver_stops_run() {
        let backend = ScriptedBackend::new(vec![
            Step::Chunk(StreamChunk::text("Merhaba")),
            Step::Chunk(StreamChunk::tool_call(search_call("kira"))),
        ]);
        let search = Arc::new(RecordingSearch::default());
        let orchestrator = Orchestrator::new(backend, search.clone(), options());
        let session = orchestrator.open(&chat_request()).await.unwrap();

        let (mut tx, rx) = mpsc::channel::<String>(8);
        drop(rx);
        let summary = session.run(&mut tx).await;

        assert_eq!(summary.outcome, Outcome::Cancelled);
        assert_eq!(summary.chunks_forwarded, 0);
        assert!(search.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_upstream_closes_cleanly() {
        let backend = ScriptedBackend::new(Vec::new());
        let (summary, records) = run_chat(backend, Arc::new(RecordingSearch::default()), options()).await;
        assert_eq!(summary.outcome, Outcome::Completed);
        assert!(records.is_empty());
    }

    #[test]
    fn test_build_request_carries_profile_and_tools() {
        let mut request = chat_request();
        request.research_summary = Some("Yargıtay 3. HD içtihatları incelendi".to_string());
        let generation = Orchestrator::build_request(&request);
        assert_eq!(generation.conversation, request.messages);
        assert!(generation
            .instruction
            .as_deref()
            .unwrap()
            .contains("Yargıtay 3. HD içtihatları incelendi"));
        assert_eq!(generation.tools.len(), 3);
        assert!(!generation.grounded_search);
    }
}
