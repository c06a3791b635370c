pub mod classify;
pub mod ids;
pub mod models;
pub mod report;

pub use classify::{Classification, LinkTemplate, classify};
pub use ids::{ItemId, ParseError, Partition, chunk_ids, normalize_text, partition_duplicates};
pub use models::FeePolicy;
pub use report::{ReportInput, remove_report, render_report, write_report};
