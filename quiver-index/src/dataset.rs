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

//! `.fvecs` / `.ivecs` Dataset Loaders
//!
//! The TEXMEX vector-file format: each record is a little-endian i32
//! dimension followed by `dim` elements (f32 for fvecs, i32 for ivecs).
//! Every record must carry the same dimension.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::info;

use quiver_core::error::{QuiverError, Result};

fn load_vecs<T, P, F>(path: P, mut read_one: F) -> Result<(Vec<T>, usize, usize)>
where
    P: AsRef<Path>,
    F: FnMut(&mut BufReader<File>) -> std::io::Result<T>,
{
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path)?);
    let mut data = Vec::new();
    let mut n = 0usize;
    let mut dim = 0usize;

    loop {
        let record_dim = match reader.read_i32::<LittleEndian>() {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        if record_dim <= 0 {
            return Err(QuiverError::CorruptFormat(format!(
                "vector record {n} declares dimension {record_dim}"
            )));
        }
        let record_dim = record_dim as usize;
        if n == 0 {
            dim = record_dim;
        } else if record_dim != dim {
            return Err(QuiverError::CorruptFormat(format!(
                "vector record {n} has dimension {record_dim}, expected {dim}"
            )));
        }
        for _ in 0..record_dim {
            data.push(read_one(&mut reader)?);
        }
        n += 1;
    }

    info!(path = %path.display(), n, dim, "loaded vector file");
    Ok((data, n, dim))
}

/// Load an `.fvecs` file as a row-major matrix; returns (data, n, dim).
pub fn load_fvecs<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, usize, usize)> {
    load_vecs(path, |r| r.read_f32::<LittleEndian>())
}

/// Load an `.ivecs` file as a row-major matrix; returns (data, n, dim).
pub fn load_ivecs<P: AsRef<Path>>(path: P) -> Result<(Vec<i32>, usize, usize)> {
    load_vecs(path, |r| r.read_i32::<LittleEndian>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn write_fvecs(path: &Path, rows: &[&[f32]]) {
        let mut file = File::create(path).unwrap();
        for row in rows {
            file.write_i32::<LittleEndian>(row.len() as i32).unwrap();
            for &x in *row {
                file.write_f32::<LittleEndian>(x).unwrap();
            }
        }
        file.flush().unwrap();
    }

    #[test]
    fn test_load_fvecs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base.fvecs");
        write_fvecs(&path, &[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);

        let (data, n, dim) = load_fvecs(&path).unwrap();
        assert_eq!((n, dim), (2, 3));
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_load_ivecs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gt.ivecs");
        let mut file = File::create(&path).unwrap();
        for row in [[7i32, 8], [9, 10]] {
            file.write_i32::<LittleEndian>(2).unwrap();
            for x in row {
                file.write_i32::<LittleEndian>(x).unwrap();
            }
        }
        drop(file);

        let (data, n, dim) = load_ivecs(&path).unwrap();
        assert_eq!((n, dim), (2, 2));
        assert_eq!(data, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_inconsistent_dimension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.fvecs");
        write_fvecs(&path, &[&[1.0, 2.0], &[1.0, 2.0, 3.0]]);

        let err = load_fvecs(&path).unwrap_err();
        assert!(matches!(err, QuiverError::CorruptFormat(_)));
    }

    #[test]
    fn test_empty_file_is_empty_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.fvecs");
        File::create(&path).unwrap();

        let (data, n, dim) = load_fvecs(&path).unwrap();
        assert!(data.is_empty());
        assert_eq!((n, dim), (0, 0));
    }
}
