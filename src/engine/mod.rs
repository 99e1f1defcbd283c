pub mod engine;
pub mod protocol;
pub mod turn;
pub mod ending;
pub mod resolution;
pub mod directive_parser;

pub mod chat_session;
pub mod prompt_builder;
pub mod llm_client;
pub mod illustration;
