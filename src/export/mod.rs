pub mod jsonl;
pub mod text;

pub use jsonl::*;
pub use text::*;
