//! Front-end wire translation: decodes vendor-shaped request bodies into the canonical
//! `Context`/`StreamOptions`, and encodes canonical `StreamEvent`s back into each vendor's SSE
//! chunk shape, so clients built against the OpenAI or Anthropic SDKs can point at this gateway
//! directly.

pub mod anthropic;
pub mod openai;
