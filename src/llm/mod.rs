//! Provider adapter interface (C7): a uniform trait across provider
//! families, plus one concrete adapter per family.

pub mod helpers;
pub mod loop_detector;
pub mod provider;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(feature = "generic-chat")]
pub mod generic_chat;

// Re-export main types
pub use helpers::*;
pub use loop_detector::{LoopAction, LoopDetection, LoopDetector, LoopDetectorConfig, LoopType};
pub use provider::*;

#[cfg(feature = "openai")]
pub use openai::OpenAIProvider;

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicProvider;

#[cfg(feature = "generic-chat")]
pub use generic_chat::GenericChatProvider;
