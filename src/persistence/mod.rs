pub mod datasource;
pub mod migrations;
pub mod store;
