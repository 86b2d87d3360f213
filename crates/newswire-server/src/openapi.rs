use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Newswire API",
        version = "0.1.0",
        description = "Distributed job scheduling for article scraping: batch submission, \
                       deduplication, priority dispatch and live progress streams."
    ),
    paths(
        crate::routes::submit_job,
        crate::routes::job_status,
        crate::routes::job_results,
        crate::routes::cancel_job,
        crate::routes::list_jobs,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::SubmitRequest,
        crate::dto::ArticleEntry,
        crate::dto::SubmitResponse,
        crate::dto::JobStatusResponse,
        crate::dto::JobResultsResponse,
        crate::dto::ArticleResult,
        crate::dto::FailedArticle,
        crate::dto::CancelResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Job submission and lifecycle"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
