pub mod aggregator;
pub mod downstream_client;
pub mod report_cards;

pub use aggregator::Aggregator;
pub use downstream_client::{DownstreamClient, HttpDownstreamClient};
pub use report_cards::{merge_report_cards, ReportCardService};
