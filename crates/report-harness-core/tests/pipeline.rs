//! End-to-end tests for the report pipeline with a scripted LLM and the
//! offline hash embedder.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::executor::block_on;

use report_harness_core::chunk::{chunk_corpus, ChunkConfig, Chunker};
use report_harness_core::embedding::{EmbeddingProvider, HashEmbedder};
use report_harness_core::error::{GenerationError, ReportError, RetrievalError};
use report_harness_core::index::FlatL2Index;
use report_harness_core::llm::{ChatRequest, FragmentSink, FragmentStream, LlmClient, NullSink};
use report_harness_core::models::SourceDocument;
use report_harness_core::parse::WRITE_ITEMS_MARKER;
use report_harness_core::report::{
    compile, parse_outline_locally, ReportAssembler, ReportRequest, ReportStage, ReportState,
};
use report_harness_core::retrieve::{chunk_digest, KnowledgeBase, Retriever};

const OUTLINE: &str = "1 总述\n1.1 背景\n撰写内容包括：目的、背景\n";

/// Streams canned replies in order, splitting each into two fragments.
struct ScriptedLlm {
    replies: Mutex<Vec<String>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlm {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| GenerationError::Malformed("no scripted reply left".into()))
    }

    async fn stream(&self, request: &ChatRequest) -> Result<FragmentStream, GenerationError> {
        let text = self.complete(request).await?;
        let mid = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let parts = vec![Ok(text[..mid].to_string()), Ok(text[mid..].to_string())];
        Ok(Box::pin(futures::stream::iter(parts)))
    }
}

/// Fails mid-stream after one fragment.
struct BrokenLlm;

#[async_trait]
impl LlmClient for BrokenLlm {
    async fn complete(&self, _request: &ChatRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Transport("down".into()))
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<FragmentStream, GenerationError> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok("1 总述\n".to_string()),
            Err(GenerationError::Transport("connection reset".into())),
        ])))
    }
}

struct CountingSink(usize);

impl FragmentSink for CountingSink {
    fn on_fragment(&mut self, _fragment: &str, _accumulated: &str) {
        self.0 += 1;
    }
}

fn knowledge_base(embedder: &HashEmbedder) -> KnowledgeBase {
    let docs = vec![
        SourceDocument {
            source: "a.txt".into(),
            content_type: "text/plain".into(),
            body: "本报告的目的是评估区域经济发展。\n\n报告背景：近年人口持续增长。".into(),
        },
        SourceDocument {
            source: "b.txt".into(),
            content_type: "text/plain".into(),
            body: "交通基础设施逐步完善。".into(),
        },
    ];
    let chunker = Chunker::new(ChunkConfig::new(20, 5)).unwrap();
    let chunks: Vec<String> = chunk_corpus(&docs, &chunker)
        .unwrap()
        .into_iter()
        .map(|c| c.text)
        .collect();
    let vectors = block_on(embedder.embed(&chunks)).unwrap();
    let mut index = FlatL2Index::new(embedder.dims());
    index.add(&vectors).unwrap();
    KnowledgeBase::from_parts(chunks, index)
}

#[test]
fn local_parse_and_compile_end_to_end() {
    let state = ReportState::new(ReportRequest::new("区域报告")).with_outline(OUTLINE);
    let parsed = parse_outline_locally(&state).unwrap();
    assert_eq!(parsed.placeholders(), &["目的", "背景"]);
    let template = parsed.scheme.as_ref().unwrap().template().to_string();
    assert!(template.contains("{目的}"));
    assert!(template.contains("{背景}"));

    let filled = parsed
        .with_paragraph("目的", "评估经济发展。")
        .unwrap()
        .with_paragraph("背景", "人口持续增长。")
        .unwrap();
    let compiled = compile(&filled).unwrap();
    let draft = compiled.draft.unwrap();
    assert!(draft.contains("评估经济发展。"));
    assert!(draft.contains("人口持续增长。"));
    assert!(!draft.contains(WRITE_ITEMS_MARKER));
    assert!(!draft.contains('{'));
}

#[test]
fn scripted_pipeline_runs_to_optimized() {
    let embedder = HashEmbedder::new(64);
    let kb = knowledge_base(&embedder);
    let llm = ScriptedLlm::new(&[
        OUTLINE,
        "段落名称为：目的,背景\n\n解析后的报告模版：\n1 总述\n1.1 背景\n目的{目的}、背景{背景}",
        "[思考过程]\n先看检索结果。\n[段落内容]\n评估经济发展。",
        "[思考过程]\n人口数据充足。\n[段落内容]\n人口持续增长。",
        "优化后的报告全文。",
    ]);
    let asm = ReportAssembler::new(&llm).with_retriever(Retriever::new(&embedder, &kb));

    let mut request = ReportRequest::new("区域报告");
    request.domain = "区域经济".into();
    request.long_model = Some("glm-4-long".into());
    let mut sink = CountingSink(0);
    let done = block_on(asm.run(&ReportState::new(request), &mut sink)).unwrap();

    assert_eq!(done.stage, ReportStage::Optimized);
    assert_eq!(done.paragraphs["目的"], "评估经济发展。");
    assert_eq!(done.paragraphs["背景"], "人口持续增长。");
    assert_eq!(done.final_report().as_deref(), Some("优化后的报告全文。"));
    assert_eq!(sink.0, 10);

    let requests = llm.requests();
    assert_eq!(requests.len(), 5);
    assert_eq!(requests[0].model, None);
    assert_eq!(requests[1].model.as_deref(), Some("glm-4-long"));
    assert!(requests[2].user.contains("专业报告段落目的"));
    assert!(requests[4].user.contains("评估经济发展。"));
    assert_eq!(requests[4].model.as_deref(), Some("glm-4-long"));
}

#[test]
fn run_stops_on_unparsed_scheme() {
    let llm = ScriptedLlm::new(&[OUTLINE, "我无法按格式输出。"]);
    let asm = ReportAssembler::new(&llm);
    let err = block_on(asm.run(&ReportState::new(ReportRequest::new("t")), &mut NullSink)).unwrap_err();
    assert!(matches!(err, ReportError::SchemeUnparsed(_)));
}

#[test]
fn interrupted_outline_preserves_partial_text() {
    let asm = ReportAssembler::new(&BrokenLlm);
    let state = ReportState::new(ReportRequest::new("t"));
    let err = block_on(asm.draft_outline(&state, &mut NullSink)).unwrap_err();
    assert_eq!(err.partial_text(), Some("1 总述\n"));
    assert_eq!(state.stage, ReportStage::Empty);
}

#[test]
fn regenerating_a_paragraph_replaces_it_and_drops_the_draft() {
    let embedder = HashEmbedder::new(64);
    let kb = knowledge_base(&embedder);
    let llm = ScriptedLlm::new(&["[段落内容]\n新的目的。"]);
    let asm = ReportAssembler::new(&llm).with_retriever(Retriever::new(&embedder, &kb));

    let state = parse_outline_locally(&ReportState::new(ReportRequest::new("t")).with_outline(OUTLINE))
        .unwrap()
        .with_paragraph("目的", "旧的目的。")
        .unwrap()
        .with_paragraph("背景", "背景。")
        .unwrap();
    let compiled = compile(&state).unwrap();

    let next = block_on(asm.generate_paragraph(&compiled, "目的", &mut NullSink)).unwrap();
    assert_eq!(next.paragraphs["目的"], "新的目的。");
    assert_eq!(next.paragraphs.len(), 2);
    assert_eq!(next.stage, ReportStage::ParagraphsPending { remaining: 0 });
    assert!(next.draft.is_none());
}

#[test]
fn retrieval_respects_k_and_detects_desync() {
    let embedder = HashEmbedder::new(64);
    let kb = knowledge_base(&embedder);
    assert!(kb.verify(&chunk_digest(&kb.chunks)).is_ok());

    let retriever = Retriever::new(&embedder, &kb);
    let n = kb.len();
    assert_eq!(block_on(retriever.retrieve("人口", 2)).unwrap().len(), 2.min(n));
    assert_eq!(block_on(retriever.retrieve("人口", n + 5)).unwrap().len(), n);

    let mut broken = kb.clone();
    broken.chunks.truncate(1);
    let retriever = Retriever::new(&embedder, &broken);
    assert!(matches!(
        block_on(retriever.retrieve("交通", n)),
        Err(RetrievalError::IndexDesync { chunks: 1, .. })
    ));
}

#[test]
fn index_survives_encode_decode_with_digest() {
    let embedder = HashEmbedder::new(32);
    let kb = knowledge_base(&embedder);
    let bytes = kb.index.encode(&kb.digest());
    let decoded = FlatL2Index::decode(&bytes).unwrap();
    let reloaded = KnowledgeBase::from_parts(kb.chunks.clone(), decoded.index);
    assert!(reloaded.verify(&decoded.chunk_digest).is_ok());

    let q = embedder.embed_one("人口增长");
    assert_eq!(
        kb.index.search(&q, 3).unwrap(),
        reloaded.index.search(&q, 3).unwrap()
    );
}
