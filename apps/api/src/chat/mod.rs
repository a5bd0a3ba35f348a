// Retrieval-augmented chat: question embedding, chunk retrieval, prompt
// assembly, streamed completion and history persistence.

pub mod handlers;
pub mod history;
pub mod prompts;
pub mod retrieval;
pub mod sse;
