/*
 * This file is part of Actix GQL Multipart.
 *
 * Copyright © 2018 Riley Trautman
 *
 * Actix GQL Multipart is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Actix GQL Multipart is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Actix GQL Multipart.  If not, see <http://www.gnu.org/licenses/>.
 */

use std::{io, path::Path};

use tempfile::TempPath;

/// Every temporary file created while processing one request.
///
/// Files are kept on disk until `cleanup` or `response_finished` is called, or the registry is
/// dropped. Files that have already been removed, for example through
/// [`FileHandle::dispose`](crate::FileHandle::dispose), are skipped silently.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<TempPath>,
}

impl TempFiles {
    pub fn new() -> Self {
        TempFiles { paths: Vec::new() }
    }

    pub(crate) fn register(&mut self, path: TempPath) {
        trace!("Registering temp file {:?}", path);
        self.paths.push(path);
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(|path| &**path)
    }

    /// Delete every registered file
    pub fn cleanup(self) {
        debug!("Removing {} temp files", self.paths.len());

        for path in self.paths {
            let display = path.to_path_buf();

            match path.close() {
                Ok(()) => (),
                Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                    trace!("Temp file {:?} already removed", display);
                }
                Err(e) => warn!("Failed to remove temp file {:?}, {}", display, e),
            }
        }
    }

    /// Called once the response for this request has been fully sent
    pub fn response_finished(self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn registry_in(dir: &Path, count: usize) -> TempFiles {
        let mut temp_files = TempFiles::new();

        for _ in 0..count {
            let file = tempfile::Builder::new()
                .prefix("gqlmp-")
                .tempfile_in(dir)
                .unwrap();
            temp_files.register(file.into_temp_path());
        }

        temp_files
    }

    #[test]
    fn cleanup_removes_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = registry_in(dir.path(), 3);

        assert_eq!(temp_files.len(), 3);
        assert!(temp_files.paths().all(|path| path.exists()));

        temp_files.cleanup();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn cleanup_tolerates_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp_files = registry_in(dir.path(), 2);

        let first = temp_files.paths().next().unwrap().to_owned();
        fs::remove_file(&first).unwrap();

        temp_files.response_finished();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn dropping_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        drop(registry_in(dir.path(), 2));

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
