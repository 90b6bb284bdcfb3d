// Copyright 2025 The hotpatch Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # hotpatch
//!
//! Live patching of known-vulnerable JVM classes at the bytecode level.
//!
//! A host (a Java agent bridge, a class-loading proxy, a build step) hands `hotpatch` each
//! class file as it is loaded or redefined. If the class is the target of an enabled patch,
//! the affected methods are decoded into an editable instruction stream, rewritten, and
//! re-encoded with fresh branch offsets, `max_stack`/`max_locals` and stack map frames. Every
//! other class is returned as [`Rewrite::Unchanged`] without being parsed.
//!
//! ## Features
//!
//! - **Exact class file round-trip** - untouched classes and members re-serialize byte for byte
//! - **Label-based instruction events** - patches never see an offset
//! - **Verifier-ready output** - type-flow analysis regenerates `StackMapTable` frames
//! - **Fail-safe patching** - a missing anchor pattern leaves the class exactly as received
//! - **Versioned patch families** - `log4j` (Log4Shell) and `spring` (Spring4Shell) built in
//!
//! ## Quick Start
//!
//! ```rust
//! use hotpatch::prelude::*;
//!
//! let registry = PatchRegistry::builtin();
//! let config = HotPatchConfig::parse("log4j=1,spring=2")?;
//! let dispatcher = Dispatcher::from_config(&config, &registry)?;
//!
//! // The host calls this for every class it loads.
//! match dispatcher.transform("com/example/Main", &[0xCA, 0xFE, 0xBA, 0xBE]) {
//!     RewriteResult::Unchanged => {}
//!     RewriteResult::Rewritten(bytes) => println!("install {} bytes", bytes.len()),
//!     RewriteResult::Error(kind) => eprintln!("left unpatched: {kind}"),
//! }
//! # Ok::<(), hotpatch::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - [`ClassBinary`]: constant pool, members and attributes
//! - [`assembly`] - `Code` attribute decoding, type-flow analysis and encoding
//! - [`patch`] - [`patch::Patch`], class matching, the transformer pipeline and strategies
//! - [`registry`] - versioned patch sets grouped by family
//! - [`dispatcher`] - class name and bytes in, [`Rewrite`] out
//! - [`config`], [`logger`], [`agent`] - configuration, diagnostics and host glue
//! - [`prelude`] - convenient re-exports
//!
//! ## Error Handling
//!
//! Malformed input and encoding failures are [`Error`]s; the host keeps the original bytes.
//! A patch whose anchor pattern is absent is not an error: the class is reported unchanged.
//!
//! ```rust
//! use hotpatch::{dispatcher::Dispatcher, logger::NullLogger, registry::log4j, Error};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::new(vec![Arc::new(log4j::no_jndi_lookup())], Arc::new(NullLogger));
//! match dispatcher.apply(log4j::JNDI_LOOKUP_CLASS, &[0xCA, 0xFE]) {
//!     Err(Error::OutOfBounds) | Err(Error::Malformed { .. }) => {}
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo bench --bench dispatch
//! cargo +nightly fuzz run classfile --release
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Synthetic classes and helpers shared by the unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use hotpatch::prelude::*;
///
/// let registry = PatchRegistry::builtin();
/// assert_eq!(registry.latest_version("log4j")?, 1);
/// # Ok::<(), hotpatch::Error>(())
/// ```
pub mod prelude;

pub mod agent;
pub mod assembly;
pub mod classfile;
pub mod config;
pub mod dispatcher;
pub mod logger;
pub mod patch;
pub mod registry;

/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `hotpatch` Error type
///
/// The main error type for all operations in this crate. See [`ErrorKind`] for the coarse
/// classification reported at the host boundary.
pub use error::{Error, ErrorKind};

/// A parsed class file. See [`classfile::ClassBinary`].
pub use classfile::ClassBinary;

/// Outcomes of dispatching a class. See [`dispatcher`].
pub use dispatcher::{Rewrite, RewriteResult};

/// Provides access to the low-level bounds-checked reader.
///
/// # Example
///
/// ```rust
/// use hotpatch::Parser;
/// let data = [0x00, 0x34];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_be::<u16>()?, 52);
/// # Ok::<(), hotpatch::Error>(())
/// ```
pub use file::parser::Parser;
