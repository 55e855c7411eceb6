pub mod report_card_task;

pub use report_card_task::start_report_card_task;
