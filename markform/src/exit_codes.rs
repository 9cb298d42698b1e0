//! Stable exit codes for markform CLI commands.

/// Command succeeded; for `inspect` and `fill`, the form is complete.
pub const OK: i32 = 0;
/// Command failed: unreadable file, parse error, bad config, or other errors.
pub const INVALID: i32 = 1;
/// `inspect` or `fill` finished with required issues still open.
pub const INCOMPLETE: i32 = 2;
/// `apply` rejected the patch batch; the document was not changed.
pub const REJECTED: i32 = 3;
