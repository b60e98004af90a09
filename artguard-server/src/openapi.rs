//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served behind Swagger UI at `/docs`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{
    BatchRequest, BatchResponse, CallbackRequest, CallbackResponse, HealthResponse, JobResponse,
    LiveResponse, ReadyResponse, SimilarRequest, SimilarResponse, SubmissionResponse,
};

/// Artguard Gateway API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Artguard - Ingress Gateway API",
        version = "0.1.0",
        description = r#"
## Image Protection Ingress Gateway

Artguard sits in front of an image-protection processor:

- **Duplicate detection** with multi-family perceptual hashes and weighted scoring
- **Asynchronous processing** through a circuit-breaker guarded dispatcher
- **Job tracking** in a shared ledger with atomic state transitions
- **Authenticated callbacks** from the processor, applied idempotently

### How It Works

1. **Submit** an image via `POST /api/v1/submissions`
2. A near-identical artwork already on record returns `200` with `status: exists`
3. New work returns `202` with a `jobId` and `status: queued`
4. The processor reports back via `POST /api/v1/callbacks/processor`
5. **Poll** `GET /api/v1/jobs/{job_id}` until the job is `completed` or `failed`
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Submissions", description = "Submit artwork for protection"),
        (name = "Jobs", description = "Poll processing jobs"),
        (name = "Callbacks", description = "Status reports from the processor"),
        (name = "Similarity", description = "Find stored artworks by perceptual hash similarity"),
        (name = "Health", description = "Liveness, readiness and dependency health")
    ),
    paths(
        crate::handlers::health::live,
        crate::handlers::health::ready,
        crate::handlers::health::health,
        crate::handlers::submit::submit_handler,
        crate::handlers::jobs::get_job_handler,
        crate::handlers::callback::callback_handler,
        crate::handlers::similar::similar_handler,
        crate::handlers::similar::similar_batch_handler,
    ),
    components(
        schemas(
            LiveResponse,
            ReadyResponse,
            HealthResponse,
            SubmissionResponse,
            JobResponse,
            CallbackRequest,
            CallbackResponse,
            SimilarRequest,
            SimilarResponse,
            BatchRequest,
            BatchResponse,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Registers the bearer scheme used by the callback endpoint.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}
