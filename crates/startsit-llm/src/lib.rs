pub mod claude;
pub mod client;
pub mod openai;
pub mod parse;

pub use client::{GradePrompt, GradeResult, Grader, GradingClient};
