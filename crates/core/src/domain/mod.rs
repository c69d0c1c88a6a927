pub mod assignment;
pub mod cascade;
