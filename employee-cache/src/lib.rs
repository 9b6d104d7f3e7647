//! Employee cache application.
//!
//! On startup, the application brings the database schema up to date, constructs a data accessor,
//! and warms a [CacheService](cache::CacheService) holding a single employee. Components are built
//! explicitly by [bootstrap](application::bootstrap) in dependency order, with migrations always
//! running to completion before anything can query the database:
//!
//! `Unstarted -> Migrating -> AccessorReady -> CacheWarming -> Ready`
//!
//! Any failure along the way moves the application to `Failed` and aborts startup.

pub mod application;
pub mod cache;
pub mod config;
pub mod dao;
pub mod employee;
pub mod mapper;
