mod collection_ref;
mod manager;

pub use collection_ref::{generate_private_token, CollectionRef};
pub use manager::{LibraryError, LibraryManager, MapRecordStore, SharedLibraryManager};
