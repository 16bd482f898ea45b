#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
pub mod util;

pub mod blocking;
pub mod condvar;
pub mod promise;
pub mod spin;

#[doc(inline)]
pub use self::blocking::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
#[doc(inline)]
pub use self::condvar::Condvar;
#[doc(inline)]
pub use self::promise::{channel, Broken, Pending, Promise, SendError};
