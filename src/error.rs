// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// A controller's register window is missing from its topology node.
    IoError,
    /// A controller node carries no usable interrupt-parent links.
    InvalidConfig,
    /// No user-mode controller serves the requesting hart.
    NoController,
}

/// A specialized [`Result`] type for this crate.
///
/// [`Result`]: core::result::Result
pub type Result<T> = core::result::Result<T, Error>;
