pub mod article;
pub mod broadcast;
pub mod dedup;
pub mod error;
pub mod event;
pub mod job;
pub mod queue;
pub mod retry;
pub mod service;
pub mod store;
pub mod testutil;
pub mod traits;
pub mod util;
pub mod worker;

pub use article::{Article, ArticleDescriptor, ArticlePatch, ArticleStatus};
pub use broadcast::Broadcaster;
pub use error::AppError;
pub use event::{JobUpdate, JOB_UPDATES_CHANNEL};
pub use job::{Job, JobStatus, NewJob};
pub use queue::{Band, WorkItem, WorkQueue, QUEUE_PREFIX};
pub use retry::RetryPolicy;
pub use service::JobService;
pub use store::Store;
pub use traits::{ScrapedContent, Scraper, UpdatePublisher};
pub use worker::{TracingWorkerReporter, Worker, WorkerConfig, WorkerReporter};
