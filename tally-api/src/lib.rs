#![deny(clippy::print_stdout, clippy::print_stderr)]

mod contracts;
mod facade;
mod providers;
mod telemetry;

pub use contracts::CorrectionContextInput;
pub use contracts::CorrectionLearned;
pub use contracts::CorrectionResponse;
pub use contracts::ProcessedInvoice;
pub use contracts::RecordCorrectionRequest;
pub use contracts::ReconcileRequest;
pub use contracts::TransactionInput;
pub use facade::FacadeError;
pub use facade::FacadeResult;
pub use facade::TallyFacade;
pub use providers::ChartOfAccountsProvider;
pub use providers::ErpAdapter;
pub use providers::ErpDocument;
pub use providers::ErpGlAccount;
pub use providers::ErpOpenInvoice;
pub use providers::ErpVendor;
pub use providers::InMemoryErpAdapter;
pub use providers::InMemoryNotificationSink;
pub use providers::NoopNotificationSink;
pub use providers::NotificationSink;
pub use providers::OperatorAlert;
pub use providers::ParkResult;
pub use providers::StaticChartProvider;
pub use providers::ValidationReport;
pub use telemetry::TallyTelemetry;
pub use telemetry::TelemetryCounters;
