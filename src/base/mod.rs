//! Core types shared by every subsystem.

pub mod neterror;
pub mod promise;
