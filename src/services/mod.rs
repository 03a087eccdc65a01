pub mod archival;
pub mod audit_log;
pub mod capture;
pub mod diff;
pub mod dispatcher;
pub mod registry;
pub mod resolver;
pub mod subscriptions;
pub mod worker;
