//! Library visit tracking server: student check-in, admin records,
//! attendance reporting and exports.

pub mod backup;
pub mod mail;
pub mod reports;
pub mod server;
pub mod storage;
