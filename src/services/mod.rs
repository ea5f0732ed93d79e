pub mod disk_store;
pub mod keys;
pub mod mime;
pub mod object_store;
pub mod site_service;
