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

use std::io;

use bytes::Bytes;
use futures::{pin_mut, Stream, StreamExt};
use tempfile::NamedTempFile;
use tokio::{
    fs::File,
    io::{AsyncWriteExt, BufWriter},
    sync::oneshot,
};

use crate::{
    barrier::CompletionBarrier,
    cleanup::TempFiles,
    error::Error,
    types::{FileHandle, FilePart, Options},
};

/// A file whose bytes have all been read, and whose flush may still be running
#[derive(Debug)]
pub(crate) struct PendingFile {
    pub(crate) variable: String,
    rx: oneshot::Receiver<Result<FileHandle, Error>>,
}

impl PendingFile {
    /// Only call this after the completion barrier has been released
    pub(crate) fn into_handle(mut self) -> Result<FileHandle, Error> {
        match self.rx.try_recv() {
            Ok(res) => res,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                "file flush was cancelled",
            ))),
        }
    }
}

fn create_temp_file(options: &Options) -> io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("gqlmp-");

    match options.temp_dir {
        Some(ref dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
}

async fn flush(mut writer: BufWriter<File>) -> io::Result<()> {
    writer.flush().await?;
    writer.into_inner().sync_all().await
}

/// Wait for any write still running on the blocking pool, then close the file
async fn close(writer: BufWriter<File>) {
    let file = writer.into_inner().into_std().await;
    drop(file);
}

/// Stream a file part into a new temporary file.
///
/// The temp file is registered in `temp_files` before any byte is written. Once the part's
/// stream ends, the flush runs on its own task and holds the barrier open until the file is on
/// disk.
pub(crate) async fn materialize<S>(
    variable: String,
    file: FilePart<S>,
    options: &Options,
    temp_files: &mut TempFiles,
    barrier: &CompletionBarrier,
) -> Result<PendingFile, Error>
where
    S: Stream<Item = Result<Bytes, Error>>,
{
    let FilePart {
        stream,
        filename,
        encoding,
        mime_type,
        ..
    } = file;

    let (file, path) = create_temp_file(options)?.into_parts();
    let stored_as = path.to_path_buf();
    temp_files.register(path);

    debug!("Writing {:?} for ${} to {:?}", filename, variable, stored_as);

    let mut writer = BufWriter::with_capacity(options.file_hwm, File::from_std(file));
    let mut size = 0;

    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Aborting write to {:?}, {}", stored_as, e);
                close(writer).await;
                return Err(e);
            }
        };

        size += chunk.len();

        if let Some(max) = options.max_file_size {
            if size > max {
                debug!("Aborting write to {:?}, file exceeds {} bytes", stored_as, max);
                close(writer).await;
                return Err(Error::FileSize(max));
            }
        }

        if let Err(e) = writer.write_all(&chunk).await {
            close(writer).await;
            return Err(e.into());
        }
    }

    trace!("Read {} bytes for ${}", size, variable);

    let pending = barrier.register();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let res = flush(writer)
            .await
            .map(|()| FileHandle::new(filename, &encoding, mime_type, stored_as))
            .map_err(Error::from);

        if let Err(ref e) = res {
            warn!("Failed to flush upload, {}", e);
        }

        // the handle must be sent before the barrier is released
        let _ = tx.send(res);
        drop(pending);
    });

    Ok(PendingFile { variable, rx })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use futures::stream;

    use super::*;

    fn file_part(
        chunks: Vec<Result<Bytes, Error>>,
    ) -> FilePart<impl Stream<Item = Result<Bytes, Error>>> {
        FilePart {
            name: "$file".to_owned(),
            stream: stream::iter(chunks),
            filename: "notes.txt".to_owned(),
            encoding: "7bit".to_owned(),
            mime_type: mime::TEXT_PLAIN,
        }
    }

    #[actix_rt::test]
    async fn round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::new().temp_dir(dir.path());
        let mut temp_files = TempFiles::new();
        let barrier = CompletionBarrier::new();

        let part = file_part(vec![
            Ok(Bytes::from_static(b"This is the 1.st ")),
            Ok(Bytes::from_static(b"test file\n")),
        ]);

        let pending = materialize("file".to_owned(), part, &options, &mut temp_files, &barrier)
            .await
            .unwrap();
        barrier.wait().await;

        assert_eq!(pending.variable, "file");
        let handle = pending.into_handle().unwrap();

        assert_eq!(handle.name, "notes.txt");
        assert_eq!(handle.encoding, "ascii");
        assert_eq!(handle.mime_type, mime::TEXT_PLAIN);
        assert!(handle
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("gqlmp-"));
        assert_eq!(fs::read(&handle.path).unwrap(), b"This is the 1.st test file\n");
        assert_eq!(temp_files.len(), 1);
    }

    #[actix_rt::test]
    async fn rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::new().temp_dir(dir.path()).max_file_size(4);
        let mut temp_files = TempFiles::new();
        let barrier = CompletionBarrier::new();

        let part = file_part(vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"de"))]);

        let err = materialize("file".to_owned(), part, &options, &mut temp_files, &barrier)
            .await
            .unwrap_err();

        match err {
            Error::FileSize(4) => (),
            e => panic!("unexpected error {:?}", e),
        }
        assert_eq!(barrier.pending(), 0);
        assert_eq!(temp_files.len(), 1);

        temp_files.cleanup();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[actix_rt::test]
    async fn aborted_writes_finish_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::new().temp_dir(dir.path()).file_hwm(1);
        let mut temp_files = TempFiles::new();
        let barrier = CompletionBarrier::new();

        let part = file_part(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(Error::ClientDisconnected),
        ]);

        materialize("file".to_owned(), part, &options, &mut temp_files, &barrier)
            .await
            .unwrap_err();

        let path = temp_files.paths().next().unwrap().to_owned();
        assert_eq!(fs::read(&path).unwrap(), b"abc");

        temp_files.cleanup();
        assert!(!path.exists());
    }

    #[actix_rt::test]
    async fn propagates_stream_errors() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::new().temp_dir(dir.path());
        let mut temp_files = TempFiles::new();
        let barrier = CompletionBarrier::new();

        let part = file_part(vec![
            Ok(Bytes::from_static(b"abc")),
            Err(Error::ClientDisconnected),
        ]);

        let err = materialize("file".to_owned(), part, &options, &mut temp_files, &barrier)
            .await
            .unwrap_err();

        assert_eq!(err.status().as_u16(), 499);
        assert_eq!(barrier.pending(), 0);
    }

    #[actix_rt::test]
    async fn unique_names_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = Options::new().temp_dir(dir.path());
        let mut temp_files = TempFiles::new();
        let barrier = CompletionBarrier::new();

        for _ in 0..3 {
            let part = file_part(vec![Ok(Bytes::from_static(b"same"))]);
            materialize("file".to_owned(), part, &options, &mut temp_files, &barrier)
                .await
                .unwrap();
        }
        barrier.wait().await;

        let mut paths: Vec<_> = temp_files.paths().map(|p| p.to_owned()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
    }
}
