pub mod batch;
pub mod history;
pub mod init;
pub mod report;
pub mod route;
pub mod version;
