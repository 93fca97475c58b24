pub mod answer_retrieval;
pub mod graph;
pub mod pipeline;
pub mod scoring;

pub use answer_retrieval::{AnsweringClient, OpenAiAnsweringClient};
pub use pipeline::{
    PipelineStageTimings, RetrievalPipeline, RetrievalRequest, RetrievalRun, RetrievalTuning,
};
pub use scoring::RetrievalCandidate;
