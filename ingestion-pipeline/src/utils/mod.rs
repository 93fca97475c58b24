pub mod chunking;
pub mod llm_instructions;
