// Host-specific filesystem and image-engine plumbing

pub mod raw;

#[cfg(unix)]
pub mod unix;

#[cfg(windows)]
pub mod windows;

pub use raw::{RawEntry, RawStream};

#[cfg(unix)]
pub use unix::{
    elevation::{enable_image_privileges, is_elevated},
    entry::{open_alternate_stream, open_default_stream, query_entry},
    materialize,
};

#[cfg(windows)]
pub use windows::{
    cimfs::CimFsEngine,
    elevation::{enable_image_privileges, is_elevated},
    entry::{open_alternate_stream, open_default_stream, query_entry},
    materialize,
};
