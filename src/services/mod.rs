pub mod budget;
pub mod catalog;
pub mod dispatch;
pub mod jobs;
pub mod upsert;
pub mod video_search;

pub use jobs::{Pipeline, PipelineSettings};
