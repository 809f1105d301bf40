//! # Kernel Error Numbers
//!
//! Values returned to user space through the system-call layer.

/// Errno value as returned to user space.
pub type Errno = i32;

/// Function not implemented.
pub const ENOSYS: Errno = 1;
/// Unsupported operation.
pub const EUNIMP: Errno = 2;
/// Out of memory.
pub const ENOMEM: Errno = 3;
/// Bad memory reference.
pub const EFAULT: Errno = 6;
/// String too long.
pub const ENAMETOOLONG: Errno = 7;
/// Invalid argument.
pub const EINVAL: Errno = 8;
/// Argument list too long.
pub const E2BIG: Errno = 14;
