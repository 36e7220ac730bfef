pub mod hslink;
