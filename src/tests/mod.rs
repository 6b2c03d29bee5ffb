//! Cross-module test suites. Unit material lives beside the code in
//! per-module `tests` blocks; everything here exercises the container
//! surface the way a client would.

mod indices;
mod snapshot;
mod util;
