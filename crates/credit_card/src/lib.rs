//! Credit-card installments paid out of a monthly-funded savings pool.
//!
//! The pure engine lives in [`calendar`], [`schedule`], [`projection`] and
//! [`settlement`]. [`service`] and [`handler`] put it behind a database and
//! an HTTP router.

pub mod calendar;
pub mod schedule;
pub mod projection;
pub mod settlement;
pub mod models;
mod repository;
pub mod service;
pub mod handler;
