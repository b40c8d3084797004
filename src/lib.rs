//! Chainable promises bound to execution contexts.
//!
//! A [`Promise`] is a single-assignment deferred value. Work is chained onto
//! it with [`Promise::then`], [`Promise::then_continue`] and
//! [`Promise::finally`], failures are observed with [`Promise::handle`], and
//! several promises are combined with [`join`], [`join3`] and [`join_all`].
//! Every promise is bound to a [`Context`]; chained steps run inline when the
//! caller already runs on the step's context and are dispatched onto it
//! otherwise.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{join, lane::Lane, run_promise, run_promise_on, Error};
//!
//! let ui = Lane::builder().name("ui").spawn().unwrap();
//! let avatar = run_promise(|| Ok(vec![0_u8; 4]));
//! let name = run_promise_on(ui.clone(), || Ok("🍓".to_owned()));
//! let done = join(&avatar, &name)
//!     .then_on(ui, |(avatar, name)| {
//!         if avatar.is_empty() {
//!             return Err(Error::new("empty avatar"));
//!         }
//!         Ok(format!("{name}: {} bytes", avatar.len()))
//!     })
//!     .finally(|outcome| println!("{outcome:?}"));
//! done.wait().unwrap();
//! ```
pub mod bridge;
pub mod cell;
pub mod context;
mod error;
pub mod join;
pub mod lane;
pub mod producer;
pub mod promise;
pub mod registry;
mod timer;

pub use crate::{
    bridge::ResultFuture,
    cell::State,
    context::{sync_if_possible, Context, Executor},
    error::Error,
    join::{join, join3, join_all},
    producer::{async_promise, async_promise_on, run_promise, run_promise_on, Produce, Resolver},
    promise::{Builder, Promise},
    registry::{Dropable, NodeId},
};

pub type VoidPromise = Promise<()>;
