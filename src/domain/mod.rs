//! Domain model: value objects, entities and the ports the core depends on.

pub mod cashback;
pub mod catalog;
pub mod money;
pub mod notification;
pub mod ports;
pub mod progress;
pub mod purchase;
pub mod transfer;
pub mod user;
