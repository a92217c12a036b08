//! Epigram - random quote HTTP service backed by Azure SQL.
//!
//! Serves random quotes from a SQL Server database, authenticating with the
//! platform managed identity instead of stored credentials: each request
//! exchanges the instance identity for a short-lived token at the metadata
//! service and presents it as an out-of-band TDS login attribute.

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod middleware;
pub mod mssql;
pub mod routes;
pub mod state;
