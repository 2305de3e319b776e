//! Role guidance for the built-in personas
//!
//! Appended to each persona header. Kept short: the request itself carries
//! the details.

mod compliance_officer;
mod customer_service;
mod data_analyst;
mod decision_maker;
mod financial_analyst;
mod hr_recruitment;
mod process_automation;

pub use compliance_officer::COMPLIANCE_OFFICER_PROMPT;
pub use customer_service::CUSTOMER_SERVICE_PROMPT;
pub use data_analyst::DATA_ANALYST_PROMPT;
pub use decision_maker::DECISION_MAKER_PROMPT;
pub use financial_analyst::FINANCIAL_ANALYST_PROMPT;
pub use hr_recruitment::HR_RECRUITMENT_PROMPT;
pub use process_automation::PROCESS_AUTOMATION_PROMPT;
