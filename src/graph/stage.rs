//! Well-known stage types and node config keys
//!
//! Stage implementations live in an external registry; these are just the
//! names the synthesizer emits and the optimizer tables refer to.

pub const CHAT_INPUT: &str = "ChatInput";
pub const CHAT_OUTPUT: &str = "ChatOutput";
pub const TEXT_OUTPUT: &str = "TextOutput";

pub const PROMPT: &str = "Prompt";
pub const INSTRUCTION: &str = "Instruction";
pub const LANGUAGE_MODEL: &str = "LanguageModel";
pub const AGENT: &str = "Agent";
pub const MEMORY: &str = "Memory";
pub const CACHE: &str = "Cache";

pub const VECTOR_STORE: &str = "VectorStore";
pub const RETRIEVER: &str = "Retriever";
pub const DOCUMENT_LOADER: &str = "DocumentLoader";
pub const URL_LOADER: &str = "URLLoader";
pub const TEXT_SPLITTER: &str = "TextSplitter";
pub const OUTPUT_PARSER: &str = "OutputParser";

pub const WEB_SEARCH: &str = "WebSearchTool";
pub const CALCULATOR: &str = "CalculatorTool";
pub const CODE_EXECUTOR: &str = "CodeExecutor";
pub const API_REQUEST: &str = "APIRequest";

/// Node config keys
pub mod keys {
    pub const TEMPLATE: &str = "template";
    pub const PROVIDER: &str = "provider";
    pub const STREAM: &str = "stream";
    pub const MAX_TOKENS: &str = "max_tokens";
    pub const CODE: &str = "code";
    pub const LANGUAGE: &str = "language";
    pub const ROLE: &str = "role";
    pub const COMPONENT: &str = "component";
}
