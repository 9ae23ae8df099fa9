pub mod exit_code;
pub mod project;
pub mod sentinel;
