//! Domain model module declarations.

pub mod entity;
pub mod ledger;
pub mod recipient;
