//! Financial metrics, weighted risk scoring and threshold alerts for
//! monitored spend units.

pub mod alerts;
pub mod assessment;
pub mod financial;

pub use alerts::{AlertGenerator, AlertReconciliation};
pub use assessment::{RiskEngine, UnitContext};
pub use financial::FinancialCalculator;
