#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![deny(clippy::all)]

#[macro_use]
mod object;
pub use crate::object::{Dictionary, Object, ObjectId, StringFormat};

mod error;
pub use crate::error::{Error, Result, XrefError};

pub mod filters;
mod grammar;
mod indirect_object;
mod object_stream;
mod parser;
mod pdf_grammar;
mod pipe;
mod scanner;
mod symbols;
mod task;
mod twin_stream;
mod writer;
pub mod xref;

pub use crate::indirect_object::{IndirectObject, ObjectClass, ObjectType, Synchronizer};
pub use crate::object_stream::ObjectStreamView;
pub use crate::parser::Parser;
pub use crate::pipe::Pipe;
pub use crate::scanner::Node;
pub use crate::task::{Task, TaskFn, TaskResult, TaskTarget};
pub use crate::twin_stream::{StreamMethod, TwinStream};
pub use crate::writer::Writer;
