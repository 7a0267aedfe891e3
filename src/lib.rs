#![doc = include_str!("../README.md")]

pub use crate::error::Error;
pub use crate::event::{Event, EventClass};
pub use crate::field::Field;
pub use crate::metadata::render_metadata;
pub use crate::schema::{FieldType, Mapping, MappingRange, TypeId};
pub use crate::stream::{Stream, StreamClass};
pub use crate::trace::{Clock, Trace};
pub use crate::types::*;
pub use crate::writer::Writer;

pub(crate) mod buffer;
pub mod error;
pub mod event;
pub mod field;
pub mod metadata;
pub mod schema;
pub mod stream;
pub mod trace;
pub mod types;
pub mod writer;
