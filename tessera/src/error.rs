// Copyright (c) 2023-present, Raphael Amorim.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use thiserror::Error;

/// Failure computing a layout.
///
/// Contract violations (unbalanced batch demands, shrinking a live buffer,
/// random access without an acquired reader) are not errors: they fail fast
/// by panicking. Hit-test misses are not errors either: they are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("markup parse failure")]
    Parse(#[from] quill::ParseError),
    #[error("font `{0}` is not registered")]
    UnknownFont(String),
    #[error("icon `{0}` is not registered")]
    UnknownIcon(String),
    #[error("font set id {0} is out of range")]
    InvalidFontSet(u32),
}
