//! FDR Service - staging, deduplication, promotion and reconciliation of
//! payment-provider flow reports.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
pub mod workers;
