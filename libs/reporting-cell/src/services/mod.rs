pub mod reports;

pub use reports::ReportingService;
