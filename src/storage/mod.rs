//! Local media storage
//!
//! Stored photos and movies live flat in one documents-style directory and
//! are named `base.ext`, `base1.ext`, `base2.ext`, ...

mod media_store;

pub use media_store::{
    MediaKind, MediaStore, NamingScheme, StorageError, StorageResult, DEFAULT_VIDEO_EXTENSION,
};
