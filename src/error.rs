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

//! Error type for congestion controller operations.

use strum_macros::EnumIter;

/// Congestion controller error.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The configuration is invalid.
    InvalidConfig(String),

    /// The timestamps carried by an acknowledgment are inconsistent, e.g. the
    /// ack was observed before the acknowledged datagram was sent. This
    /// usually means the caller mixed clock domains.
    MalformedTimestamp(String),
}

impl Error {
    /// Return the error number using by the C caller.
    pub fn to_errno(&self) -> libc::ssize_t {
        match self {
            Error::InvalidConfig(_) => -1,
            Error::MalformedTimestamp(_) => -2,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn error_to_errno() {
        let mut errnos = Vec::new();
        for err in Error::iter() {
            assert!(err.to_errno() < 0);
            assert!(!errnos.contains(&err.to_errno()));
            errnos.push(err.to_errno());
        }
    }

    #[test]
    fn error_display() {
        use std::error::Error;
        let e = super::Error::MalformedTimestamp("ack 10 before send 20".into());

        assert_eq!(
            format!("{}", e),
            "MalformedTimestamp(\"ack 10 before send 20\")"
        );
        assert!(e.source().is_none());
    }
}
