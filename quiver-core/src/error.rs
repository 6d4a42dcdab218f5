// Copyright 2025 Sushanth (https://github.com/sushanthpy)
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

//! Error types for Quiver

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuiverError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Searcher holds no data: call set_data before search")]
    NotTrained,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Corrupt graph file: {0}")]
    CorruptFormat(String),

    #[error("Aligned allocation of {0} bytes failed")]
    OutOfMemory(usize),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, QuiverError>;

/// Shorthand for the pervasive dimension check at API boundaries.
pub fn check_dim(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(QuiverError::InvalidArgument(format!(
            "dimension mismatch: expected {expected}, got {got}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = QuiverError::InvalidArgument("k must be >= 1".to_string());
        assert_eq!(e.to_string(), "Invalid argument: k must be >= 1");

        let e = QuiverError::NotTrained;
        assert!(e.to_string().contains("set_data"));

        let e = QuiverError::OutOfMemory(1 << 21);
        assert!(e.to_string().contains("2097152"));
    }

    #[test]
    fn test_check_dim() {
        assert!(check_dim(128, 128).is_ok());
        let err = check_dim(128, 64).unwrap_err();
        assert!(matches!(err, QuiverError::InvalidArgument(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let e: QuiverError = io_err.into();
        assert!(matches!(e, QuiverError::Io(_)));
    }
}
