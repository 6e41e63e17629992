pub mod anthropic;
pub mod mock;
pub mod sse;
pub mod traits;

pub use anthropic::AnthropicProvider;
pub use mock::MockProvider;
pub use traits::*;
