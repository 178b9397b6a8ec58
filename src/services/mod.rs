//! Background services.

pub mod maintenance;
pub mod reconcile;

pub use maintenance::{MaintenanceReport, run_once, spawn_backup_task, spawn_maintenance_task};
pub use reconcile::{Reconciler, SweepReport, spawn_reconcile_task};
