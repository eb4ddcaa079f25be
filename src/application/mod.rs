pub mod bootstrap;
pub mod commands;
pub mod oauth;
pub mod reconcile;
pub mod schedule_sync;
