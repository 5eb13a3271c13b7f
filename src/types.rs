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

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use mime::Mime;
#[cfg(feature = "with-serde")]
use serde_derive::Serialize;

use crate::cleanup::TempFiles;

/// The variables of a multipart request, keyed by name without the leading `$`
pub type Variables = HashMap<String, Value>;

/// A single variable value.
///
/// Values from the `payload` and `variables` parts, and `$name` parts sent as
/// `application/json`, are parsed JSON. Other `$name` fields are kept as JSON strings. Uploaded
/// files become a `File`. A file sent for a name that already holds a value turns the entry into
/// a `List`, and an existing JSON array is extended with the file.
///
/// # Example usage
///
/// ```rust
/// # use gql_multipart::{Payload, Value};
/// # let payload = Payload { query: "{ a }".to_owned(), variables: None };
/// if let Some(variables) = payload.variables {
///     match variables.get("files") {
///         Some(Value::List(values)) => {
///             for file in values.iter().filter_map(Value::as_file) {
///                 println!("{} stored at {:?}", file.name, file.path);
///             }
///         }
///         Some(Value::File(file)) => println!("{} stored at {:?}", file.name, file.path),
///         Some(Value::Json(json)) => println!("{}", json),
///         None => (),
///     }
/// }
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "with-serde", derive(Serialize))]
#[cfg_attr(feature = "with-serde", serde(untagged))]
pub enum Value {
    Json(serde_json::Value),
    File(FileHandle),
    List(Vec<Value>),
}

impl Value {
    /// Add an uploaded file to an existing entry, promoting anything but `null` to a list
    pub(crate) fn push_file(existing: Option<Value>, handle: FileHandle) -> Value {
        let file = Value::File(handle);

        match existing {
            None | Some(Value::Json(serde_json::Value::Null)) => file,
            Some(Value::List(mut values)) => {
                values.push(file);
                Value::List(values)
            }
            Some(Value::Json(serde_json::Value::Array(values))) => Value::List(
                values
                    .into_iter()
                    .map(Value::Json)
                    .chain(Some(file))
                    .collect(),
            ),
            Some(first) => Value::List(vec![first, file]),
        }
    }

    pub fn as_file(&self) -> Option<&FileHandle> {
        match *self {
            Value::File(ref handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match *self {
            Value::List(ref values) => Some(values),
            _ => None,
        }
    }

    /// The files in a list, skipping any JSON values next to them
    pub fn as_files(&self) -> Option<Vec<&FileHandle>> {
        self.as_list()
            .map(|values| values.iter().filter_map(Value::as_file).collect())
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match *self {
            Value::Json(ref json) => Some(json),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::Json(json)
    }
}

/// The query and variables assembled from a multipart request
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "with-serde", derive(Serialize))]
pub struct Payload {
    pub query: String,
    #[cfg_attr(
        feature = "with-serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub variables: Option<Variables>,
}

/// An uploaded file, flushed to a temporary file on disk
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "with-serde", derive(Serialize))]
pub struct FileHandle {
    /// The filename the client declared for this part
    pub name: String,
    pub encoding: String,
    #[cfg_attr(feature = "with-serde", serde(serialize_with = "serialize_mime"))]
    pub mime_type: Mime,
    pub path: PathBuf,
}

impl FileHandle {
    pub(crate) fn new(name: String, encoding: &str, mime_type: Mime, path: PathBuf) -> Self {
        FileHandle {
            name,
            encoding: normalize_encoding(encoding),
            mime_type,
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file backing this handle.
    ///
    /// A file that is already gone is not an error, so the request's own cleanup can run
    /// after a consumer disposed of the file.
    pub fn dispose(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(feature = "with-serde")]
fn serialize_mime<S>(mime: &Mime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(mime.as_ref())
}

/// `7bit` is reported as `ascii`, every other transfer encoding is kept as sent
pub(crate) fn normalize_encoding(encoding: &str) -> String {
    if encoding.eq_ignore_ascii_case("7bit") {
        "ascii".to_owned()
    } else {
        encoding.to_owned()
    }
}

/// A successfully processed request.
///
/// The temporary files stay on disk until `temp_files` is cleaned up, which should happen once
/// the response has been sent.
#[derive(Debug)]
pub struct Upload {
    pub payload: Payload,
    pub temp_files: TempFiles,
}

impl Upload {
    pub fn into_parts(self) -> (Payload, TempFiles) {
        (self.payload, self.temp_files)
    }
}

/// A non-file part, with its value already read into memory
#[derive(Clone, Debug, PartialEq)]
pub struct FieldPart {
    pub name: String,
    pub value: String,
    pub name_truncated: bool,
    pub value_truncated: bool,
    pub encoding: String,
    pub mime_type: Mime,
}

/// A file part, with its bytes still unread in `stream`
pub struct FilePart<S> {
    pub name: String,
    pub stream: S,
    pub filename: String,
    pub encoding: String,
    pub mime_type: Mime,
}

impl<S> fmt::Debug for FilePart<S> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FilePart")
            .field("name", &self.name)
            .field("stream", &"stream")
            .field("filename", &self.filename)
            .field("encoding", &self.encoding)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// The events a multipart tokenizer produces, in body order.
///
/// The end of the event stream means the body finished. An `Err` item is a tokenizer failure
/// and is reported as-is.
#[derive(Debug)]
pub enum Event<S> {
    Field(FieldPart),
    File(FilePart<S>),
    FieldsLimit,
    FilesLimit,
    Disconnected,
}

/// Options controlling how a request is tokenized and where files are stored
///
/// # Example
/// ```rust
/// # use gql_multipart::Options;
/// let options = Options::new()
///     .temp_dir("/tmp/uploads")
///     .max_files(5)
///     .max_file_size(10_000_000);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    pub high_water_mark: usize,
    pub file_hwm: usize,
    pub def_charset: String,
    pub temp_dir: Option<PathBuf>,
    pub max_field_name_size: usize,
    pub max_field_size: usize,
    pub max_fields: Option<usize>,
    pub max_file_size: Option<usize>,
    pub max_files: Option<usize>,
    pub max_header_pairs: usize,
}

impl Options {
    pub fn new() -> Self {
        Options {
            high_water_mark: 16 * 1024,
            file_hwm: 16 * 1024,
            def_charset: "utf-8".to_owned(),
            temp_dir: None,
            max_field_name_size: 100,
            max_field_size: 1024 * 1024,
            max_fields: None,
            max_file_size: None,
            max_files: None,
            max_header_pairs: 2000,
        }
    }

    /// Set the buffer size used while reading field values
    pub fn high_water_mark(mut self, size: usize) -> Self {
        self.high_water_mark = size;

        self
    }

    /// Set the buffer size used while writing files to disk
    pub fn file_hwm(mut self, size: usize) -> Self {
        self.file_hwm = size;

        self
    }

    /// Set the charset used for fields that don't declare one
    ///
    /// Supported charsets are `utf-8`, `us-ascii` and `latin1`.
    pub fn def_charset(mut self, charset: &str) -> Self {
        self.def_charset = charset.to_owned();

        self
    }

    /// Set the directory temporary files are created in
    ///
    /// Defaults to the OS temporary directory.
    pub fn temp_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.as_ref().to_owned());

        self
    }

    /// Set the maximum length of a field name (in bytes)
    ///
    /// The upload will error if a longer name is provided.
    pub fn max_field_name_size(mut self, max: usize) -> Self {
        self.max_field_name_size = max;

        self
    }

    /// Set the maximum size of a field (in bytes)
    ///
    /// The upload will error if a provided field is too large.
    pub fn max_field_size(mut self, max: usize) -> Self {
        self.max_field_size = max;

        self
    }

    /// Set the maximum number of fields allowed in the upload
    ///
    /// The upload will error if too many fields are provided.
    pub fn max_fields(mut self, max: usize) -> Self {
        self.max_fields = Some(max);

        self
    }

    /// Set the maximum size for files (in bytes)
    ///
    /// The upload will error if a provided file is too large.
    ///
    /// # Example
    /// ```rust
    /// # use gql_multipart::Options;
    /// let options = Options::new().max_file_size(1024);
    /// assert_eq!(options.max_file_size, Some(1024));
    /// ```
    pub fn max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = Some(max);

        self
    }

    /// Set the maximum number of files allowed in the upload
    ///
    /// The upload will error if too many files are provided.
    pub fn max_files(mut self, max: usize) -> Self {
        self.max_files = Some(max);

        self
    }

    /// Set the maximum number of headers allowed on a single part
    pub fn max_header_pairs(mut self, max: usize) -> Self {
        self.max_header_pairs = max;

        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Options::new()
    }
}
