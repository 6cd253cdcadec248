/// Database model definitions.
pub mod models;
/// Placement ranking rules applied by the remote ranking procedure.
pub mod ranking;
/// Storage abstraction layer for database operations.
pub mod storage;
/// Remote trial store abstraction and its backends.
pub mod trial_store;
