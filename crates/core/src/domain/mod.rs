pub mod account;
pub mod brief;
pub mod conversation;
pub mod fields;
pub mod request;
