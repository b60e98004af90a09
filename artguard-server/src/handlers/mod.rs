//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod callback;
pub mod health;
pub mod jobs;
pub mod similar;
pub mod submit;

pub use crate::state::AppState;
pub use callback::{callback_handler, CallbackRequest, CallbackResponse};
pub use health::{health, live, ready, HealthResponse, LiveResponse, ReadyResponse};
pub use jobs::{get_job_handler, JobResponse};
pub use similar::{
    similar_batch_handler, similar_handler, BatchRequest, BatchResponse, SimilarRequest,
    SimilarResponse,
};
pub use submit::{submit_handler, SubmissionResponse};
