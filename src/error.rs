// Copyright (c) 2023 The TQUIC Authors.
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

//! Error type for engine configuration.
//!
//! The per-ACK and per-transmit paths never fail; errors only surface when
//! a caller hands the engine an out-of-range tunable.

use std::fmt;

use strum_macros::EnumIter;

/// Engine error.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The configuration is invalid.
    InvalidConfig(String),

    /// A value passed through the C API could not be interpreted.
    InvalidArgument(String),
}

impl Error {
    /// Return the error number using by the C caller.
    pub(crate) fn to_errno(&self) -> libc::ssize_t {
        match self {
            Error::InvalidConfig(_) => -1,
            Error::InvalidArgument(_) => -2,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
