pub mod init;
pub mod ops;
